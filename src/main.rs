use std::path::PathBuf;

enum Action {
    Exit,
    WhoAmI,
    Run,
}

fn main() {
    let mut options = listings_tui::RunOptions::default();
    let action = handle_cli_flags(&mut options);

    let result = match action {
        Action::Exit => return,
        Action::WhoAmI => listings_tui::app::whoami(options.config_file).map(|who| {
            println!("{who}");
        }),
        Action::Run => listings_tui::run(options),
    };

    if let Err(err) = result {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags(options: &mut listings_tui::RunOptions) -> Action {
    let mut action = Action::Run;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("listings-tui {}", listings_tui::VERSION);
                action = Action::Exit;
            }
            "--help" | "-h" => {
                println!(
                    "listings-tui - Browse and vote on community listings from the terminal.\n\n  --version, -V          Show version and exit\n  --help,    -h          Show this help message\n  --whoami               Print login status reported by the server and exit\n  --demo                 Browse built-in sample listings without a server\n  --config <path>        Read settings from <path> instead of the default config file"
                );
                action = Action::Exit;
            }
            "--whoami" => {
                if !matches!(action, Action::Exit) {
                    action = Action::WhoAmI;
                }
            }
            "--demo" => options.demo = true,
            "--config" => match args.next() {
                Some(path) => options.config_file = Some(PathBuf::from(path)),
                None => {
                    eprintln!("error: --config needs a path");
                    std::process::exit(2);
                }
            },
            _ => {}
        }
    }
    action
}
