use std::path::PathBuf;

const USAGE: &str = "usage: metrics-relay --config <file> \
[--listen tcp://HOST:PORT|unix://PATH] [--context-path PREFIX] \
[--log-level LEVEL] [--json-logs]";

#[derive(Debug)]
pub(crate) struct CliArgs {
    pub config: PathBuf,
    pub listen: String,
    pub context_path: String,
    pub log_level: String,
    pub json_logs: bool,
}

pub(crate) fn parse_args(
    mut args: impl Iterator<Item = String>,
) -> Result<CliArgs, Box<dyn std::error::Error>> {
    let mut config: Option<PathBuf> = None;
    let mut listen = "tcp://127.0.0.1:9998".to_string();
    let mut context_path = String::new();
    let mut log_level = "info".to_string();
    let mut json_logs = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(args.next().ok_or("missing value for --config")?.into());
            }
            "--listen" => {
                listen = args.next().ok_or("missing value for --listen")?;
            }
            "--context-path" => {
                context_path = args.next().ok_or("missing value for --context-path")?;
            }
            "--log-level" => {
                log_level = args.next().ok_or("missing value for --log-level")?;
            }
            "--json-logs" => json_logs = true,
            "--help" | "-h" => return Err(USAGE.into()),
            other => return Err(format!("unknown arg: {other}\n{USAGE}").into()),
        }
    }

    let config = config.ok_or(USAGE)?;
    Ok(CliArgs {
        config,
        listen,
        context_path,
        log_level,
        json_logs,
    })
}
