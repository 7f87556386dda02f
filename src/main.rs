fn main() {
    if let Err(err) = consolidata::run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
