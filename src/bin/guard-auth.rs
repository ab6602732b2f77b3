//! guard-auth - privilege-separated authenticator spawned by guardd

fn main() {
    std::process::exit(guard_auth::cli::main());
}
