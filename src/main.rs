mod app;

fn main() {
    let res = crate::app::run();
    if let Err(err) = res {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
