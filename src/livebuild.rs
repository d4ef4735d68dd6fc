//! live-build invocation.
//!
//! The rootfs is built by `lb config` followed by `lb build`, both run in
//! the chroot directory. When the target architecture differs from the
//! host's, live-build bootstraps through a static qemu user-mode
//! interpreter that has to be copied into the build root first.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, IoContext, Result};
use crate::host::Host;
use crate::process::Cmd;

pub const AUTO_PATH_ENV: &str = "IMAGE_BUILDER_LIVECD_ROOTFS_AUTO_PATH";
pub const QEMU_STATIC_ENV: &str = "IMAGE_BUILDER_QEMU_USER_STATIC_PATH";

/// Debian name of the architecture this binary was built for.
pub fn host_arch() -> &'static str {
    match env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "armhf",
        "powerpc64" => "ppc64el",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        other => other,
    }
}

/// Name of the qemu user-mode binary emulating `arch`.
pub fn qemu_static_for_arch(arch: &str) -> Option<&'static str> {
    match arch {
        "armhf" => Some("qemu-arm-static"),
        "arm64" => Some("qemu-aarch64-static"),
        "ppc64el" => Some("qemu-ppc64le-static"),
        "s390x" => Some("qemu-s390x-static"),
        "riscv64" => Some("qemu-riscv64-static"),
        _ => None,
    }
}

/// Locations that override the default lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveBuild {
    /// livecd-rootfs `auto` scripts; looked up with dpkg when unset.
    pub auto_path: Option<PathBuf>,
    /// Static interpreter; looked up on `PATH` when unset.
    pub qemu_static_path: Option<PathBuf>,
}

impl LiveBuild {
    pub fn from_env() -> Self {
        Self {
            auto_path: env::var_os(AUTO_PATH_ENV).map(PathBuf::from),
            qemu_static_path: env::var_os(QEMU_STATIC_ENV).map(PathBuf::from),
        }
    }

    /// Prepare `root_dir` and return the `(lb config, lb build)` pair.
    pub fn setup_build_commands(
        &self,
        host: &Host,
        root_dir: &Path,
        target_arch: &str,
        extra_args: &[String],
        cross_build: bool,
    ) -> Result<(Cmd, Cmd)> {
        let mut config = Cmd::new("lb").arg("config").dir(root_dir);
        let build = Cmd::new("lb").arg("build").dir(root_dir);

        let auto_src = match &self.auto_path {
            Some(path) => path.clone(),
            None => find_livecd_rootfs_auto(host)?,
        };
        let auto_dst = root_dir.join("auto");
        host.fs.copy_tree(&auto_src, &auto_dst).io_context(|| {
            format!(
                "Error copying livecd-rootfs/auto from '{}'",
                auto_src.display()
            )
        })?;

        config = config.args(extra_args);

        if cross_build && target_arch != host_arch() {
            let interpreter = self.locate_interpreter(target_arch)?;
            let bin_dir = root_dir.join("usr/bin");
            host.fs
                .create_dir_all(&bin_dir)
                .io_context(|| format!("Error creating '{}'", bin_dir.display()))?;
            host.fs.copy_special(&interpreter, &bin_dir).io_context(|| {
                format!("Error copying qemu-static binary '{}'", interpreter.display())
            })?;
            tracing::info!(
                arch = target_arch,
                interpreter = %interpreter.display(),
                "cross-building rootfs"
            );

            config = config
                .args(["--bootstrap-qemu-arch", target_arch])
                .arg("--bootstrap-qemu-static")
                .arg_path(&interpreter)
                .args(["--architectures", target_arch]);
        }

        Ok((config, build))
    }

    fn locate_interpreter(&self, arch: &str) -> Result<PathBuf> {
        if let Some(path) = &self.qemu_static_path {
            return Ok(path.clone());
        }
        let unsupported = || {
            BuildError::tool(
                format!("No qemu-user-static binary found for architecture '{}'", arch),
                format!("Use {} in case of non-standard archs or custom paths", QEMU_STATIC_ENV),
            )
        };
        let name = qemu_static_for_arch(arch).ok_or_else(unsupported)?;
        which::which(name).map_err(|_| unsupported())
    }
}

/// Last line of `dpkg -L livecd-rootfs` ending in `auto`.
fn find_livecd_rootfs_auto(host: &Host) -> Result<PathBuf> {
    let cmd = Cmd::new("dpkg").args(["-L", "livecd-rootfs"]);
    let output = host
        .runner
        .run(&cmd)
        .io_context(|| "Error running dpkg -L livecd-rootfs")?;
    if !output.success() {
        return Err(BuildError::tool(
            "Error running dpkg -L livecd-rootfs",
            output.failure_summary(),
        ));
    }
    output
        .stdout
        .lines()
        .rev()
        .find(|line| line.trim_end().ends_with("auto"))
        .map(|line| PathBuf::from(line.trim_end()))
        .ok_or_else(|| {
            BuildError::tool(
                "Error locating livecd-rootfs/auto",
                "dpkg -L livecd-rootfs lists no auto directory",
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FailingFs, FsOp, RecordingRunner};
    use std::fs;
    use tempfile::TempDir;

    fn auto_dir(temp: &TempDir) -> PathBuf {
        let auto = temp.path().join("livecd-rootfs/auto");
        fs::create_dir_all(&auto).unwrap();
        fs::write(auto.join("config"), "#!/bin/sh\n").unwrap();
        auto
    }

    #[test]
    fn test_native_commands() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("chroot");
        fs::create_dir_all(&root).unwrap();
        let lb = LiveBuild {
            auto_path: Some(auto_dir(&temp)),
            qemu_static_path: None,
        };

        let (config, build) = lb
            .setup_build_commands(
                &Host::system(),
                &root,
                host_arch(),
                &["--mode".to_string(), "ubuntu".to_string()],
                true,
            )
            .unwrap();

        assert_eq!(config.to_string(), "lb config --mode ubuntu");
        assert_eq!(build.to_string(), "lb build");
        assert_eq!(config.get_dir(), Some(root.as_path()));
        assert_eq!(build.get_dir(), Some(root.as_path()));
        assert!(root.join("auto/config").exists());
    }

    #[test]
    fn test_cross_arch_appends_bootstrap_args() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("chroot");
        fs::create_dir_all(&root).unwrap();
        let qemu = temp.path().join("qemu-riscv64-static");
        fs::write(&qemu, "ELF").unwrap();
        let lb = LiveBuild {
            auto_path: Some(auto_dir(&temp)),
            qemu_static_path: Some(qemu.clone()),
        };
        let arch = if host_arch() == "riscv64" { "arm64" } else { "riscv64" };

        let (config, _) = lb
            .setup_build_commands(&Host::system(), &root, arch, &[], true)
            .unwrap();

        let args = config.get_args();
        let pos = args.iter().position(|a| a == "--bootstrap-qemu-arch").unwrap();
        assert_eq!(args[pos + 1], arch);
        assert!(args.iter().any(|a| a == "--bootstrap-qemu-static"));
        assert!(args.iter().any(|a| a == "--architectures"));
        assert!(root.join("usr/bin/qemu-riscv64-static").exists());

        // Without cross-building the target arch is passed through untouched.
        let (config, _) = lb
            .setup_build_commands(&Host::system(), &root, arch, &[], false)
            .unwrap();
        assert!(!config.get_args().iter().any(|a| a == "--bootstrap-qemu-arch"));
    }

    #[test]
    fn test_failed_setup_build_commands() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("chroot");
        fs::create_dir_all(&root).unwrap();

        // dpkg fails
        let host = Host::system().with_runner(RecordingRunner::failing(1));
        let err = LiveBuild::default()
            .setup_build_commands(&host, &root, host_arch(), &[], true)
            .unwrap_err();
        assert!(err.to_string().contains("exit status 1"), "{}", err);

        // copying auto fails
        let lb = LiveBuild {
            auto_path: Some(auto_dir(&temp)),
            qemu_static_path: None,
        };
        let host = Host::system().with_fs(FailingFs::on(FsOp::CopyTree));
        let err = lb
            .setup_build_commands(&host, &root, host_arch(), &[], true)
            .unwrap_err();
        assert!(err.to_string().contains("Error copying livecd-rootfs/auto"));

        // arch with no known interpreter
        let err = lb
            .setup_build_commands(&Host::system(), &root, "fake64", &[], true)
            .unwrap_err();
        assert!(matches!(err, BuildError::ExternalTool { .. }));
        assert!(err
            .to_string()
            .contains("in case of non-standard archs or custom paths"));
    }

    #[test]
    fn test_auto_dir_from_dpkg_listing() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("chroot");
        fs::create_dir_all(&root).unwrap();
        let auto = auto_dir(&temp);
        let listing = format!(
            "/usr/share/doc/livecd-rootfs\n{}\n/usr/share/livecd-rootfs/live-build/auto-not\n",
            auto.display()
        );
        let host = Host::system().with_runner(RecordingRunner::with_stdout(&listing));

        LiveBuild::default()
            .setup_build_commands(&host, &root, host_arch(), &[], true)
            .unwrap();
        assert!(root.join("auto/config").exists());
    }

    #[test]
    fn test_qemu_names() {
        assert_eq!(qemu_static_for_arch("arm64"), Some("qemu-aarch64-static"));
        assert_eq!(qemu_static_for_arch("ppc64el"), Some("qemu-ppc64le-static"));
        assert_eq!(qemu_static_for_arch("fake64"), None);
    }
}
