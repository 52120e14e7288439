use ncplot::cli;

fn main() {
    std::process::exit(cli::run());
}
