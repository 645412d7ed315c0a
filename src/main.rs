use clap::{Parser, Subcommand};
use forseti::devops;

#[derive(Parser)]
#[command(name = "forseti", about = "Forseti - search index reconciliation sidecar")]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the development Postgres + MeiliSearch containers (docker compose up -d)
	StartStack {
		/// Build the images before bringing up the services
		#[arg(long)]
		build: bool,
		/// Force recreate containers
		#[arg(long)]
		force_recreate: bool,
		/// Timeout in seconds for docker commands
		#[arg(long, default_value_t = 120)]
		timeout: u64,
		/// Number of retry attempts on failure
		#[arg(long, default_value_t = 2u8)]
		retries: u8,
		/// Optional working directory where docker-compose.yml lives
		#[arg(long)]
		workdir: Option<String>,
	},
	/// Stop the development containers (docker compose stop)
	StopStack,
	/// Run one reconciliation pass and print the report as JSON
	Check,
	/// Run the service (default)
	Run,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	match cli.command.unwrap_or(Commands::Run) {
		Commands::StartStack {
			build,
			force_recreate,
			timeout,
			retries,
			workdir,
		} => {
			let mut opts = devops::docker_manager::StartOptions::default();
			opts.build = build;
			opts.force_recreate = force_recreate;
			opts.timeout_secs = timeout;
			opts.retries = retries;
			opts.workdir = workdir.map(|s| std::path::PathBuf::from(s));

			match devops::docker_manager::start_dev_stack_with_opts(opts).await {
				Ok(true) => println!("Postgres + MeiliSearch dev containers started (forseti will stop them)."),
				Ok(false) => println!("Postgres + MeiliSearch dev containers already running; not started."),
				Err(e) => eprintln!("Failed to start dev stack: {}", e),
			}
		}
		Commands::StopStack => match devops::stop_dev_stack().await {
			Ok(()) => println!("Postgres + MeiliSearch dev containers stopped."),
			Err(e) => eprintln!("Failed to stop dev stack: {}", e),
		},
		Commands::Check => match forseti::check().await {
			Ok(code) => std::process::exit(code),
			Err(e) => {
				eprintln!("check failed: {}", e);
				std::process::exit(2);
			}
		},
		Commands::Run => {
			if let Err(e) = forseti::run().await {
				eprintln!("forseti failed: {}", e);
				std::process::exit(1);
			}
		}
	}
}
