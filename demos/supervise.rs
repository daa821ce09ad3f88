// Example: supervise two processes, watch one directory, stop on Ctrl-C
//
// Run with: cargo run --example supervise

use std::sync::Arc;
use std::time::Duration;
use vigia::config::{ProcessSpec, SupervisorSettings};
use vigia::process::{shutdown_signal, Supervisor};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== vigia supervision demo ===\n");

    let workdir = std::env::temp_dir().join("vigia-demo");
    std::fs::create_dir_all(&workdir)?;

    // A long-running process restarted whenever files under `workdir` change
    let mut web = ProcessSpec::new("web", "/bin/sleep");
    web.args = vec!["3600".to_string()];
    web.watch = true;
    web.cwd = Some(workdir.clone());

    // A flaky process that exits every few seconds and is relaunched with backoff
    let mut flaky = ProcessSpec::new("flaky", "/bin/sh");
    flaky.args = vec!["-c".to_string(), "echo tick; sleep 3; exit 1".to_string()];
    flaky.max_restarts = Some(5);

    let settings = SupervisorSettings {
        pid_dir: workdir.join(".vigia").join("pids"),
        watch_debounce_ms: 300,
        ..SupervisorSettings::default()
    };

    let supervisor = Arc::new(Supervisor::load(vec![web, flaky], settings)?);
    let report = supervisor.start().await?;

    for (name, pid) in &report.launched {
        println!("✓ {} started (PID: {})", name, pid);
    }
    println!(
        "\nTouch a file in {} to restart 'web'. Press Ctrl-C to stop.\n",
        workdir.display()
    );

    let monitor = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.monitor_loop().await })
    };

    // Print a status line every few seconds until interrupted
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    let stop = shutdown_signal();
    tokio::pin!(stop);

    loop {
        tokio::select! {
            result = &mut stop => {
                result?;
                break;
            }
            _ = ticker.tick() => {
                for status in supervisor.status() {
                    println!(
                        "  {:<8} {:<10} pid={:<8} restarts={}",
                        status.name,
                        status.state.to_string(),
                        status.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                        status.restarts
                    );
                }
            }
        }
    }

    println!("\nStopping...");
    supervisor.shutdown().await?;
    monitor.await??;
    println!("✓ All processes stopped");

    Ok(())
}
