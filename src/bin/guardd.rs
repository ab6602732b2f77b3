//! guardd - saverguard session daemon
//!
//! See `guardd --help`; the implementation lives in the `guardd` crate.

fn main() -> anyhow::Result<()> {
    guardd::cli::main()
}
