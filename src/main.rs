use stress_test::{stress_test_convergence, stress_test_offline, stress_test_scaling};
use consort_engine::SyncError;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("could not start the tokio runtime: {}", e);
            std::process::exit(1);
        }
    };
    match rt.block_on(async_main()) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("stress run aborted: {}", e);
            std::process::exit(1);
        }
    }
}

async fn async_main() -> Result<bool, SyncError> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            CONVERGENCE STRESS RUNS                         ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut converged = true;

    // Run 1: few devices, heavy contention on few objects
    let stats = stress_test_convergence(3, 40, 60, 5).await?;
    stats.print();
    converged &= stats.converged;

    // Run 2: more devices, wider object pool
    let stats = stress_test_convergence(6, 60, 150, 40).await?;
    stats.print();
    converged &= stats.converged;

    // Run 3: devices dropping offline mid-run
    let stats = stress_test_offline(5, 40, 120).await?;
    stats.print();
    converged &= stats.converged;

    // Run 4: scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    converged &= stress_test_scaling(8, 2).await?;

    if converged {
        println!("\n✓ Every run converged");
    } else {
        println!("\n✗ Some devices diverged");
    }
    Ok(converged)
}
