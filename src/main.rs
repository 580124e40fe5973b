use micropanel::{
    app::App,
    cli::{Command, RunOptions},
    Result,
};

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match Command::parse(&args) {
        Ok(Command::ShowHelp) => {
            Command::print_help();
            Ok(())
        }
        Ok(Command::ShowVersion) => {
            println!("micropanel {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Ok(Command::Run(opts)) => run(opts),
        Err(err) => {
            Command::print_help();
            Err(err)
        }
    }
}

fn run(opts: RunOptions) -> Result<()> {
    App::from_options(opts)?.run()
}
