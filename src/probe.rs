//! Capability detection for the mounted target.
//!
//! Optional components (snapper, grub helpers, limine, microcode images) are
//! probed exactly once, up front. Every later step consults the resulting
//! immutable set instead of re-stating filesystem checks, so a run's shape
//! is fixed by the target's state at start.

use crate::config::TargetContext;

/// Target-relative paths probed for each capability.
pub const SNAPPER_BIN: &str = "usr/bin/snapper";
pub const UPDATE_GRUB_BIN: &str = "usr/bin/update-grub";
pub const GRUB_SET_BOOTFLAG_BIN: &str = "usr/bin/grub-set-bootflag";
pub const GRUB_MKCONFIG_BIN: &str = "usr/bin/grub-mkconfig";
pub const DD_BIN: &str = "usr/bin/dd";
pub const LIMINE_EFI_MARKER: &str = "usr/share/limine/BOOTX64.EFI";
pub const INTEL_UCODE_IMAGE: &str = "boot/intel-ucode.img";
pub const AMD_UCODE_IMAGE: &str = "boot/amd-ucode.img";

/// What the target turned out to contain.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    /// snapper binary is installed.
    pub snapper: bool,
    /// Debian-style `update-grub` wrapper.
    pub update_grub: bool,
    /// `grub-set-bootflag` helper (Fedora-style hidden-menu support).
    pub grub_set_bootflag: bool,
    /// `grub-mkconfig` generator.
    pub grub_mkconfig: bool,
    /// `dd`, needed for the kernel image rewrite workaround.
    pub dd: bool,
    /// Limine EFI payload shipped in the target.
    pub limine: bool,
    /// Intel microcode boot image present.
    pub intel_ucode_image: bool,
    /// AMD microcode boot image present.
    pub amd_ucode_image: bool,
}

impl Capabilities {
    /// Probe the target once and freeze the answers.
    pub fn probe(ctx: &TargetContext) -> Self {
        let have = |rel: &str| ctx.resolve(rel).exists();
        Self {
            snapper: have(SNAPPER_BIN),
            update_grub: have(UPDATE_GRUB_BIN),
            grub_set_bootflag: have(GRUB_SET_BOOTFLAG_BIN),
            grub_mkconfig: have(GRUB_MKCONFIG_BIN),
            dd: have(DD_BIN),
            limine: have(LIMINE_EFI_MARKER),
            intel_ucode_image: have(INTEL_UCODE_IMAGE),
            amd_ucode_image: have(AMD_UCODE_IMAGE),
        }
    }

    /// One-line summary for the run log.
    pub fn summary(&self) -> String {
        let mut found = Vec::new();
        if self.snapper {
            found.push("snapper");
        }
        if self.update_grub {
            found.push("update-grub");
        }
        if self.grub_set_bootflag {
            found.push("grub-set-bootflag");
        }
        if self.grub_mkconfig {
            found.push("grub-mkconfig");
        }
        if self.limine {
            found.push("limine");
        }
        if self.intel_ucode_image {
            found.push("intel-ucode.img");
        }
        if self.amd_ucode_image {
            found.push("amd-ucode.img");
        }
        if found.is_empty() {
            "none".to_string()
        } else {
            found.join(", ")
        }
    }
}
