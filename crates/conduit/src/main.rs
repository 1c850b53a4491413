fn main() {
    if let Err(e) = conduit::init() {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
}
