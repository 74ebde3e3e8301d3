use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::{ARCH, PLATFORM, RUSTC_VERSION};

/// Compiler versions with published precompiled modules, and the ABI label
/// their archives are filed under.
static ABI_MAP: &[(&str, &str)] = &[
    ("1.81", "rustc-1.81"),
    ("1.82", "rustc-1.82"),
    ("1.83", "rustc-1.83"),
    ("1.84", "rustc-1.84"),
    ("1.85", "rustc-1.85"),
    ("1.86", "rustc-1.86"),
    ("1.87", "rustc-1.87"),
    ("1.88", "rustc-1.88"),
    ("1.89", "rustc-1.89"),
    ("1.90", "rustc-1.90"),
];

/// Looks up the ABI label for a full rustc version such as `1.84.1`.
pub fn abi_for_rustc(version: &str) -> Option<&'static str> {
    let mut parts = version.trim().splitn(3, '.');
    let major = parts.next()?;
    let minor = parts.next()?;
    let minor = minor
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or(minor);
    let key = format!("{}.{}", major, minor);
    ABI_MAP
        .iter()
        .find(|(rustc, _)| *rustc == key)
        .map(|(_, abi)| *abi)
}

/// The C library this crate was built against, on Linux only.
fn libc_flavour() -> Option<&'static str> {
    if PLATFORM != "linux" {
        None
    } else if cfg!(target_env = "musl") {
        Some("musl")
    } else {
        Some("glibc")
    }
}

/// Identifies which precompiled build fits this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiTag {
    /// Operating system, e.g. `linux`.
    pub platform: String,
    /// CPU architecture, e.g. `x86_64`.
    pub arch: String,
    /// C library flavour, only set on Linux.
    pub libc: Option<String>,
    /// ABI label from the compatibility table.
    pub abi: String,
}

impl AbiTag {
    /// The tag of the running build, `None` if the compiler version is not
    /// in the compatibility table.
    pub fn detect() -> Option<AbiTag> {
        let abi = abi_for_rustc(RUSTC_VERSION?)?;
        Some(AbiTag::from_parts(PLATFORM, ARCH, libc_flavour(), abi))
    }

    /// Creates a tag from its parts.
    pub fn from_parts(platform: &str, arch: &str, libc: Option<&str>, abi: &str) -> AbiTag {
        AbiTag {
            platform: platform.to_owned(),
            arch: arch.to_owned(),
            libc: libc.map(str::to_owned),
            abi: abi.to_owned(),
        }
    }

    /// Where the archive of `module_name` lives below `root`:
    /// `<platform>/<arch>/[<libc>/]<abi>/<module_name>.tar.gz`.
    pub fn archive_path(&self, root: &Path, module_name: &str) -> PathBuf {
        let mut path = root.join(&self.platform).join(&self.arch);
        if let Some(libc) = &self.libc {
            path.push(libc);
        }
        path.push(&self.abi);
        path.push(format!("{}.tar.gz", module_name));
        path
    }
}

impl fmt::Display for AbiTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.libc {
            Some(libc) => write!(
                f,
                "({}/{}/{}/ABI {})",
                self.platform, self.arch, libc, self.abi
            ),
            None => write!(f, "({}/{}/ABI {})", self.platform, self.arch, self.abi),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abi_lookup() {
        assert_eq!(abi_for_rustc("1.84.1"), Some("rustc-1.84"));
        assert_eq!(abi_for_rustc("1.90.0-nightly"), Some("rustc-1.90"));
        assert_eq!(abi_for_rustc("1.12.0"), None);
        assert_eq!(abi_for_rustc("garbage"), None);
    }

    #[test]
    fn test_archive_path() {
        let root = Path::new("/opt/addons");
        let linux = AbiTag::from_parts("linux", "x86_64", Some("musl"), "rustc-1.84");
        assert_eq!(
            linux.archive_path(root, "gcstats"),
            Path::new("/opt/addons/linux/x86_64/musl/rustc-1.84/gcstats.tar.gz")
        );
        assert_eq!(linux.to_string(), "(linux/x86_64/musl/ABI rustc-1.84)");

        let mac = AbiTag::from_parts("darwin", "aarch64", None, "rustc-1.84");
        assert_eq!(
            mac.archive_path(root, "gcstats"),
            Path::new("/opt/addons/darwin/aarch64/rustc-1.84/gcstats.tar.gz")
        );
        assert_eq!(mac.to_string(), "(darwin/aarch64/ABI rustc-1.84)");
    }

    #[test]
    fn test_detect_matches_build() {
        if let Some(tag) = AbiTag::detect() {
            assert_eq!(tag.platform, PLATFORM);
            assert_eq!(tag.arch, ARCH);
            assert_eq!(tag.libc.is_some(), PLATFORM == "linux");
        }
    }
}
