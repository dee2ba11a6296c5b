use std::path::PathBuf;

/// Suite run when `--config` is not given
pub const DEFAULT_SUITE: &str = "config/suites/kvm_pseries_bringup.yaml";

/// libvirt connection used by virsh and virt-install
pub const DEFAULT_CONNECT_URI: &str = "qemu:///system";

/// Hypervisor management service restarted around module toggles
pub const MANAGEMENT_SERVICE: &str = "libvirtd";

/// Modprobe configuration that blocks the accelerator modules
pub fn kvm_blacklist() -> PathBuf {
    PathBuf::from("/etc/modprobe.d/disable-kvm.conf")
}

/// Host boot command line, copied verbatim in host-kernel mode
pub fn host_cmdline() -> PathBuf {
    PathBuf::from("/proc/cmdline")
}

/// Host kernel used in host-kernel mode when none is given
pub fn host_kernel() -> PathBuf {
    PathBuf::from("/boot/vmlinuz")
}

/// Host initrd used in host-kernel mode when none is given
pub fn host_initrd() -> PathBuf {
    PathBuf::from("/boot/initramfs.img")
}

/// Expand `~` in a user-supplied local path
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_leaves_plain_paths_alone() {
        assert_eq!(expand("guests/disk.qcow2"), PathBuf::from("guests/disk.qcow2"));
    }

    #[test]
    fn test_expand_tilde() {
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(expand("~/disk.qcow2"), PathBuf::from(home).join("disk.qcow2"));
        }
    }
}
