use zrpc_peer::Client;

use crate::cmd::{client_config, runtime, InspectArgs};
use crate::exit::{peer_error, rpc_error, CliError, CliResult, SUCCESS};
use crate::output::{print_procedures, OutputFormat};

pub fn run(args: InspectArgs, format: OutputFormat, heartbeat: &str) -> CliResult<i32> {
    let config = client_config(heartbeat, &args.connect_timeout)?;

    runtime()?.block_on(async {
        let client = Client::connect(&args.address, config)
            .map_err(|err| peer_error("connect failed", err))?;
        let procedures = client
            .inspect()
            .await
            .map_err(|err| rpc_error("inspect failed", err))?;
        print_procedures(&procedures, format);
        Ok::<_, CliError>(SUCCESS)
    })
}
