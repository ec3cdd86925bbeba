// inventory lending system
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
	match invsys::start_server().await {
		Ok(()) => ExitCode::SUCCESS,
		Err(_) => ExitCode::FAILURE,
	}
}
