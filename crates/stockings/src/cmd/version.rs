use stockings_transport::ReadinessKind;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("stockings {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: stockings");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "target: {}",
        option_env!("STOCKINGS_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("readiness: {}", ReadinessKind::detect());
    println!(
        "poll_interval_ms: {}",
        stockings_transport::default_poll_interval().as_millis()
    );

    Ok(SUCCESS)
}
