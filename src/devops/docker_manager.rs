use anyhow::{Result, anyhow};
use log::{error, info};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;
use tokio::time::timeout;

/// Compose services making up the dev stack: Postgres and MeiliSearch.
const SERVICES: [&str; 2] = ["db", "search"];

/// Options to control compose start behavior.
#[derive(Debug, Clone)]
pub struct StartOptions {
	pub build: bool,
	pub force_recreate: bool,
	pub timeout_secs: u64,
	pub retries: u8,
	pub workdir: Option<PathBuf>,
}

impl Default for StartOptions {
	fn default() -> Self {
		Self {
			build: false,
			force_recreate: false,
			timeout_secs: 120,
			retries: 2,
			workdir: None,
		}
	}
}

/// Try to detect whether `docker compose` (v2) is available, otherwise fall back
/// to `docker-compose` (v1). Returns the program name and whether the first
/// arg should be `compose` (true for `docker compose`).
async fn detect_compose() -> Option<(String, bool)> {
	// Try `docker compose version`
	if let Ok(mut cmd) = Command::new("docker").arg("compose").arg("version").spawn() {
		if let Ok(status) = cmd.wait().await {
			if status.success() {
				return Some(("docker".to_string(), true));
			}
		}
	}

	// Try `docker-compose --version`
	if let Ok(mut cmd) = Command::new("docker-compose").arg("--version").spawn() {
		if let Ok(status) = cmd.wait().await {
			if status.success() {
				return Some(("docker-compose".to_string(), false));
			}
		}
	}

	None
}

fn compose_command(prog: &str, is_docker_compose: bool) -> Command {
	let mut c = Command::new(prog);
	if is_docker_compose {
		c.arg("compose");
	}
	c
}

async fn run_command_with_timeout(mut cmd: Command, timeout_secs: u64) -> Result<()> {
	let dur = Duration::from_secs(timeout_secs);
	info!("Running command with timeout: {:?}", cmd);
	let f = cmd.status();
	match timeout(dur, f).await {
		Ok(Ok(status)) => {
			if status.success() {
				Ok(())
			} else {
				Err(anyhow!("command exited with non-zero status"))
			}
		}
		Ok(Err(e)) => Err(anyhow!("failed to spawn command: {}", e)),
		Err(_) => Err(anyhow!("command timed out after {}s", timeout_secs)),
	}
}

// Capture command output with a timeout
async fn run_command_capture(mut cmd: Command, timeout_secs: u64) -> Result<String> {
	let dur = Duration::from_secs(timeout_secs);
	let f = cmd.output();
	match timeout(dur, f).await {
		Ok(Ok(output)) => {
			if output.status.success() {
				Ok(String::from_utf8_lossy(&output.stdout).to_string())
			} else {
				Err(anyhow!("command exited with non-zero status"))
			}
		}
		Ok(Err(e)) => Err(anyhow!("failed to spawn command: {}", e)),
		Err(_) => Err(anyhow!("command timed out after {}s", timeout_secs)),
	}
}

async fn get_container_id(
	prog: &str,
	is_docker_compose: bool,
	service: &str,
	wd: &Option<PathBuf>,
) -> Result<Option<String>> {
	let mut cmd = compose_command(prog, is_docker_compose);
	cmd.arg("ps").arg("-q").arg(service);
	if let Some(d) = wd {
		cmd.current_dir(d);
	}

	match run_command_capture(cmd, 10).await {
		Ok(s) => {
			let id = s.trim();
			if id.is_empty() {
				Ok(None)
			} else {
				Ok(Some(id.to_string()))
			}
		}
		Err(_) => Ok(None),
	}
}

async fn inspect_running(container_id: &str) -> Result<bool> {
	let mut cmd = Command::new("docker");
	cmd.arg("inspect")
		.arg("-f")
		.arg("{{.State.Running}}")
		.arg(container_id);
	let out = cmd
		.output()
		.await
		.map_err(|e| anyhow!("failed to inspect container: {}", e))?;
	if !out.status.success() {
		return Ok(false);
	}
	let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
	Ok(s == "true")
}

fn marker_path(wd: &Option<PathBuf>) -> PathBuf {
	if let Some(d) = wd {
		d.join(".forseti_stack_started")
	} else {
		env::current_dir()
			.unwrap_or_else(|_| PathBuf::from("."))
			.join(".forseti_stack_started")
	}
}

fn write_marker(wd: &Option<PathBuf>, container_ids: &[String]) -> Result<()> {
	let p = marker_path(wd);
	std::fs::write(p, container_ids.join("\n"))
		.map_err(|e| anyhow!("failed to write marker file: {}", e))
}

/// True when every stack service already has a running container.
async fn all_services_running(
	prog: &str,
	is_docker_compose: bool,
	wd: &Option<PathBuf>,
) -> bool {
	for service in SERVICES {
		match get_container_id(prog, is_docker_compose, service, wd).await {
			Ok(Some(id)) => {
				if !matches!(inspect_running(&id).await, Ok(true)) {
					return false;
				}
			}
			_ => return false,
		}
	}
	true
}

/// Start the dev stack services defined in `docker-compose.yml` (`db` and
/// `search`). Returns Ok(true) if this call started the stack, Ok(false) if
/// every service was already running and we did not start anything.
pub async fn start_dev_stack_with_opts(opts: StartOptions) -> Result<bool> {
	let (prog, is_docker_compose) = detect_compose()
		.await
		.ok_or_else(|| anyhow!("neither 'docker compose' nor 'docker-compose' found in PATH"))?;

	let wd = opts.workdir.or_else(|| env::current_dir().ok());

	// Optionally build first
	if opts.build {
		let mut build_cmd = compose_command(&prog, is_docker_compose);
		build_cmd.arg("build").args(SERVICES);
		if let Some(ref d) = wd {
			build_cmd.current_dir(d);
		}

		run_command_with_timeout(build_cmd, opts.timeout_secs).await?;
	}

	// If the whole stack is already up, return early and indicate we did not
	// start it; the marker-file ownership then stays with whoever did.
	if all_services_running(&prog, is_docker_compose, &wd).await {
		info!("dev stack containers already running");
		return Ok(false);
	}

	let mut attempts = 0u8;
	let mut last_err = None;
	while attempts <= opts.retries {
		let mut up_cmd = compose_command(&prog, is_docker_compose);
		up_cmd.arg("up").arg("-d").args(SERVICES);
		if opts.force_recreate {
			up_cmd.arg("--force-recreate");
		}
		if let Some(ref d) = wd {
			up_cmd.current_dir(d);
		}

		match run_command_with_timeout(up_cmd, opts.timeout_secs).await {
			Ok(()) => {
				info!("docker compose up succeeded");
				// Capture container ids and write the ownership marker
				let mut ids = Vec::new();
				for service in SERVICES {
					if let Ok(Some(id)) =
						get_container_id(&prog, is_docker_compose, service, &wd).await
					{
						ids.push(id);
					}
				}
				if let Err(e) = write_marker(&wd, &ids) {
					error!("failed to write marker file: {}", e);
				}
				return Ok(true);
			}
			Err(e) => {
				error!("attempt {}: docker compose up failed: {}", attempts + 1, e);
				last_err = Some(e);
				attempts += 1;
				sleep(Duration::from_secs(2)).await;
			}
		}
	}

	Err(last_err.unwrap_or_else(|| anyhow!("docker compose up failed after retries")))
}

/// Stop the development stack, but only if this tool started it (determined
/// by the presence of a marker file).
pub async fn stop_dev_stack() -> Result<()> {
	let (prog, is_docker_compose) = detect_compose()
		.await
		.ok_or_else(|| anyhow!("neither 'docker compose' nor 'docker-compose' found in PATH"))?;

	let wd = env::current_dir().ok();

	let marker = marker_path(&wd);
	if !marker.exists() {
		info!("marker file not found; will not stop a stack that was not started by this tool");
		return Ok(());
	}

	// If the marker exists but none of its containers are running, just
	// clean up the marker and exit.
	let marker_ids: Vec<String> = std::fs::read_to_string(&marker)
		.ok()
		.map(|s| {
			s.lines()
				.map(|l| l.trim().to_string())
				.filter(|l| !l.is_empty())
				.collect()
		})
		.unwrap_or_default();

	let mut any_running = false;
	for id in &marker_ids {
		if let Ok(true) = inspect_running(id).await {
			any_running = true;
			break;
		}
	}
	if !marker_ids.is_empty() && !any_running {
		let _ = std::fs::remove_file(&marker);
		info!("marker existed but no stack container is running; removed marker");
		return Ok(());
	}

	// Prefer stopping/removing only the stack services, not the whole
	// compose project.
	let mut cmd = compose_command(&prog, is_docker_compose);
	cmd.arg("stop").args(SERVICES);
	if let Some(ref d) = wd {
		cmd.current_dir(d);
	}

	match run_command_with_timeout(cmd, 60).await {
		Ok(()) => {
			// Remove the container instances (rm -f) to ensure a clean state
			let mut rm_cmd = compose_command(&prog, is_docker_compose);
			rm_cmd.arg("rm").arg("-f").args(SERVICES);
			if let Some(ref d) = wd {
				rm_cmd.current_dir(d);
			}
			let _ = run_command_with_timeout(rm_cmd, 60).await;

			let _ = std::fs::remove_file(&marker);
			info!("dev stack stopped and marker removed");
			Ok(())
		}
		Err(e) => Err(e),
	}
}

/// Convenience wrapper using default options.
pub async fn start_dev_stack() -> Result<bool> {
	start_dev_stack_with_opts(StartOptions::default()).await
}

#[cfg(feature = "devops-tests")]
mod tests {
	use super::*;

	// These tests are limited to compile-time and non-Docker environments.
	#[tokio::test]
	async fn detect_no_crash() {
		// detect_compose should not panic; it may return None if docker isn't installed.
		let _ = detect_compose().await;
	}

	#[test]
	fn marker_path_lands_in_workdir() {
		let wd = Some(std::path::PathBuf::from("/tmp/forseti-test"));
		assert_eq!(
			marker_path(&wd),
			std::path::PathBuf::from("/tmp/forseti-test/.forseti_stack_started")
		);
	}
}
