//! CPU microcode package pruning.
//!
//! The base package set installs both vendors' microcode. Once the target
//! hardware is known, the other vendor's package is dead weight in every
//! initramfs rebuild, so it gets removed. The trigger is the boot image
//! file, not package database state: image generation is what makes the
//! removal meaningful.

use anyhow::Result;
use std::fs;

use crate::probe::Capabilities;
use crate::process::Runner;

/// CPU vendor as reported by the host hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuVendor {
    Amd,
    Intel,
    /// Anything other than the two known vendor strings.
    Unknown,
}

/// Read the host CPU vendor from /proc/cpuinfo.
pub fn detect_vendor() -> CpuVendor {
    match fs::read_to_string("/proc/cpuinfo") {
        Ok(cpuinfo) => parse_vendor(&cpuinfo),
        Err(_) => CpuVendor::Unknown,
    }
}

/// Extract the vendor from cpuinfo text.
///
/// Looks for the first `vendor_id` line, mirroring what
/// `hwinfo --cpu | grep Vendor: -m1` would report.
pub fn parse_vendor(cpuinfo: &str) -> CpuVendor {
    for line in cpuinfo.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() != "vendor_id" {
            continue;
        }
        return match value.trim() {
            "AuthenticAMD" => CpuVendor::Amd,
            "GenuineIntel" => CpuVendor::Intel,
            _ => CpuVendor::Unknown,
        };
    }
    CpuVendor::Unknown
}

/// Apply the microcode policy for the detected vendor.
///
/// AMD hardware drops `intel-ucode` (and vice versa), but only when the
/// corresponding boot image actually exists in the target; a missing image
/// is a silent no-op. An unknown vendor means no package was removed and
/// the image generator never re-ran, so the initramfs is rebuilt instead.
pub fn apply(vendor: CpuVendor, caps: &Capabilities, runner: &dyn Runner) -> Result<()> {
    match vendor {
        CpuVendor::Amd => remove_if_image_present(runner, "intel-ucode", caps.intel_ucode_image),
        CpuVendor::Intel => remove_if_image_present(runner, "amd-ucode", caps.amd_ucode_image),
        CpuVendor::Unknown => {
            println!("[postcfg] Unknown CPU vendor, rebuilding initramfs");
            let rebuild = runner.run_in_target(&["mkinitcpio", "-P"])?;
            if !rebuild.success() {
                anyhow::bail!(
                    "mkinitcpio -P failed (exit code {}): {}",
                    rebuild.code,
                    rebuild.stderr_trimmed()
                );
            }
            Ok(())
        }
    }
}

fn remove_if_image_present(runner: &dyn Runner, pkg: &str, image_present: bool) -> Result<()> {
    if !image_present {
        println!("[postcfg] {} boot image not present, nothing to remove", pkg);
        return Ok(());
    }

    println!("[postcfg] Removing unneeded {}", pkg);
    let removal = runner.run_in_target(&["pacman", "-Rns", "--noconfirm", pkg])?;
    if !removal.success() {
        anyhow::bail!(
            "pacman -Rns {} failed (exit code {}): {}",
            pkg,
            removal.code,
            removal.stderr_trimmed()
        );
    }
    Ok(())
}
