use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("zrpc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: zrpc");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("protocol_version: {}", zrpc_frame::PROTOCOL_VERSION);
    println!(
        "build_target: {}",
        option_env!("ZRPC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "transports: tcp{}",
        if cfg!(unix) { ", ipc" } else { "" }
    );
    println!("features: peer={}, cli=true", cfg!(feature = "peer"));

    Ok(SUCCESS)
}
