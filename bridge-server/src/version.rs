//! Build-time version information, replacing the original's hand-rolled
//! git-tag regex parser with the `built` crate's compile-time facts.

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// One line suitable for `--version` output: crate name, git describe (or
/// the plain semver if the build wasn't done inside a git checkout), and
/// the UTC build timestamp.
pub fn describe() -> String {
    let git = built_info::GIT_VERSION.unwrap_or(built_info::PKG_VERSION);
    format!(
        "{} {} (built {})",
        built_info::PKG_NAME,
        git,
        built_info::BUILT_TIME_UTC
    )
}
