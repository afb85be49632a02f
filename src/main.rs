fn main() {
    std::process::exit(webserial_bridge_lib::run())
}
