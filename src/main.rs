fn main() {
    #[cfg(feature = "cli")]
    ktiy::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("ktiy: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
