use river_poller_lib::{
    cli::{parse_args, Command},
    commands::{run_account, run_meta, run_poll},
};

#[tokio::main]
async fn main() {
    let code = match parse_args().into_command() {
        Command::Poll(args) => run_poll(args).await,
        Command::Meta(args) => run_meta(args).await,
        Command::Account(args) => run_account(args).await,
    };
    std::process::exit(code);
}
