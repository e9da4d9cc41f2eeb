//! The kernel, Buildroot and image steps for both build variants.
//!
//! Steps are shell scripts run inside the build container. Kernel and
//! Buildroot option lines are kept as data ([`KconfigFragment`]) and
//! rendered into `echo ... >> .config` lines.

use std::time::Duration;

use crate::process::shell_quote;
use crate::retry::BuildStep;

/// Build tree inside the container.
pub const BUILD_ROOT: &str = "/rpi-boot";
/// Host output directory, mounted into the container.
pub const OUTPUT_MOUNT: &str = "/output";
/// Final disk image name.
pub const IMAGE_FILE: &str = "rpi4-complete.img";
/// Image assembly script copied into the build tree.
pub const AUTO_BUILD_SCRIPT: &str = "auto_build.sh";

const CROSS: &str = "ARCH=arm64 CROSS_COMPILE=aarch64-linux-gnu-";

/// Parallel jobs cap for CI runners.
pub const CI_JOBS: u32 = 4;

/// Container image build limit in CI.
pub const IMAGE_BUILD_TIMEOUT: Duration = Duration::from_secs(1800);

/// Option lines appended to a kernel or Buildroot `.config`.
#[derive(Debug, Clone, Copy)]
pub struct KconfigFragment {
    pub lines: &'static [&'static str],
}

impl KconfigFragment {
    pub fn render(&self, file: &str) -> Vec<String> {
        self.lines
            .iter()
            .map(|line| format!("echo {} >> {}", shell_quote(line), file))
            .collect()
    }
}

pub const KERNEL_OPTIONS: KconfigFragment = KconfigFragment {
    lines: &["CONFIG_NETFILTER=y", "CONFIG_IPTABLES=y"],
};

pub const BUILDROOT_OPTIONS: KconfigFragment = KconfigFragment {
    lines: &[
        "BR2_PACKAGE_OPENSSH=y",
        "BR2_PACKAGE_SUDO=y",
        "BR2_SYSTEM_ROOT_PASSWORD=\"raspberry\"",
        "BR2_ROOTFS_USERS_TABLES=\"board/users_table.txt\"",
    ],
};

pub const CI_BUILDROOT_OPTIONS: KconfigFragment = KconfigFragment {
    lines: &[
        "BR2_PACKAGE_OPENSSH=y",
        "BR2_PACKAGE_SUDO=y",
        "BR2_PACKAGE_NANO=y",
        "BR2_PACKAGE_BASH=y",
        "BR2_ROOTFS_POST_BUILD_SCRIPT=\"board/raspberrypi/post-build.sh\"",
        "BR2_ROOTFS_POST_IMAGE_SCRIPT=\"board/raspberrypi/post-image.sh\"",
    ],
};

/// Buildroot users table: a `pi` user with sudo.
const USERS_TABLE: &str = "pi -1 pi -1 =raspberry /home/pi /bin/bash sudo";

/// How many parallel jobs make may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jobs {
    AllCores,
    Capped(u32),
}

impl Jobs {
    fn prelude(self) -> Vec<String> {
        match self {
            Jobs::AllCores => Vec::new(),
            Jobs::Capped(cap) => vec![
                "NPROC=$(nproc)".to_string(),
                format!("if [ \"$NPROC\" -gt {cap} ]; then NPROC={cap}; fi"),
                "echo \"parallel jobs: $NPROC\"".to_string(),
            ],
        }
    }

    fn flag(self) -> &'static str {
        match self {
            Jobs::AllCores => "-j$(nproc)",
            Jobs::Capped(_) => "-j$NPROC",
        }
    }
}

/// Line-by-line shell script that stops at the first failing line.
#[derive(Debug)]
struct Script {
    lines: Vec<String>,
}

impl Script {
    fn new() -> Self {
        Self {
            lines: vec!["set -e".to_string()],
        }
    }

    fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    fn lines(mut self, lines: impl IntoIterator<Item = String>) -> Self {
        self.lines.extend(lines);
        self
    }

    fn render(self) -> String {
        self.lines.join("\n")
    }
}

/// Which builder the steps are for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Persistent container, all cores, full module build.
    Interactive,
    /// Ephemeral container, capped jobs, Image + dtbs only.
    Ci,
}

impl Variant {
    pub fn steps(self) -> Vec<BuildStep> {
        match self {
            Variant::Interactive => vec![
                BuildStep::new("kernel build", kernel_script(Jobs::AllCores, "Image modules dtbs")),
                BuildStep::new("Buildroot build", buildroot_script(Jobs::AllCores, BUILDROOT_OPTIONS, true)),
                BuildStep::new("image assembly", image_script()),
            ],
            Variant::Ci => {
                let jobs = Jobs::Capped(CI_JOBS);
                vec![
                    BuildStep::new("kernel build", kernel_script(jobs, "Image dtbs")),
                    BuildStep::new("Buildroot build", buildroot_script(jobs, CI_BUILDROOT_OPTIONS, false)),
                    BuildStep::new("image export", ci_export_script()),
                ]
                .into_iter()
                .map(|step| step.max_retries(2).show_output(false))
                .collect()
            }
        }
    }
}

fn kernel_script(jobs: Jobs, targets: &str) -> String {
    Script::new()
        .line(format!("cd {}/linux", BUILD_ROOT))
        .lines(jobs.prelude())
        .line(format!("make {} bcm2711_defconfig", CROSS))
        .lines(KERNEL_OPTIONS.render(".config"))
        .line(format!("make {} olddefconfig", CROSS))
        .line(format!("make {} {} {}", CROSS, jobs.flag(), targets))
        .render()
}

fn buildroot_script(jobs: Jobs, options: KconfigFragment, users_table: bool) -> String {
    let mut script = Script::new()
        .line(format!("cd {}/buildroot", BUILD_ROOT))
        .lines(jobs.prelude());
    if users_table {
        script = script.line(format!(
            "echo {} > board/users_table.txt",
            shell_quote(USERS_TABLE)
        ));
    }
    script
        .line("make raspberrypi4_64_defconfig")
        .lines(options.render(".config"))
        .line("make olddefconfig")
        .line(format!("make {}", jobs.flag()))
        .render()
}

fn image_script() -> String {
    Script::new()
        .line(format!("cd {}", BUILD_ROOT))
        .line(format!("bash {}/{}", BUILD_ROOT, AUTO_BUILD_SCRIPT))
        .render()
}

fn ci_export_script() -> String {
    Script::new()
        .line(format!("cd {}/buildroot", BUILD_ROOT))
        .line(format!("cp output/images/sdcard.img {}/{}", OUTPUT_MOUNT, IMAGE_FILE))
        .line(format!("ls -lh {}/{}", OUTPUT_MOUNT, IMAGE_FILE))
        .render()
}

/// Copy the finished image from the build tree to the output mount.
/// Best effort: succeeds even when the image is missing.
pub fn copy_out_command() -> String {
    format!(
        "cp {}/{} {}/ 2>/dev/null || true",
        BUILD_ROOT, IMAGE_FILE, OUTPUT_MOUNT
    )
}
