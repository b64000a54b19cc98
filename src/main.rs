fn main() {
    if let Err(e) = snapstore::run() {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
