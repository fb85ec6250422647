fn main() {
    std::process::exit(msc_lib::run())
}
