use portgate::{build_router, ConfigOverrides, GatewayConfig, GatewayState};
use std::env;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn usage() -> String {
    "USAGE:\n  portgate [--config <path>] [--listen <addr>] [--target <host>]\n\n\
OPTIONS:\n  --config <path>   TOML config file (or PORTGATE_CONFIG, default: portgate.toml)\n  --listen <addr>   Bind address for visitors (or PORTGATE_LISTEN, default: 127.0.0.1:8080)\n  --target <host>   Host the ports are forwarded to (or PORTGATE_TARGET_HOST, default: localhost)\n  -h, --help        Show this help\n\n\
The shared key and the signing secret come from the config file ([auth] key, jwt_secret)\nor from PORTGATE_KEY and PORTGATE_JWT_SECRET.\n"
        .to_string()
}

fn parse_args() -> Result<GatewayConfig, String> {
    let mut overrides = ConfigOverrides::from_env();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                return Err(usage());
            }
            "--config" => {
                let value = args.next().ok_or("--config requires a value")?;
                overrides.config_path = Some(PathBuf::from(value));
            }
            "--listen" => {
                let value = args.next().ok_or("--listen requires a value")?;
                overrides.listen = Some(value);
            }
            "--target" => {
                let value = args.next().ok_or("--target requires a value")?;
                let value = value.trim().to_string();
                if value.is_empty() {
                    return Err("--target requires a non-empty value".to_string());
                }
                overrides.target_host = Some(value);
            }
            other => {
                return Err(format!("unknown option: {other}"));
            }
        }
    }

    GatewayConfig::load(overrides).map_err(|error| error.to_string())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let usage_text = usage();
    let config = match parse_args() {
        Ok(config) => config,
        Err(error) => {
            let is_help = error == usage_text;
            eprintln!("{error}");
            if !is_help {
                eprintln!("\n{}", usage_text);
            }
            std::process::exit(if is_help { 0 } else { 2 });
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(%error, "failed to build tokio runtime");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async move {
        let listen_addr = config.listen;
        let target_host = config.target_host.clone();
        let port_policy = !config.allowed_ports.is_empty() || !config.forbidden_ports.is_empty();

        let state = GatewayState::new(config)
            .map_err(|error| format!("failed to build upstream client: {error}"))?;
        let app = build_router(state);

        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|error| format!("failed to bind {listen_addr}: {error}"))?;

        tracing::info!(
            %listen_addr,
            %target_host,
            port_policy,
            "portgate listening"
        );

        axum::serve(listener, app)
            .await
            .map_err(|error| format!("portgate server failed: {error}"))
    });

    if let Err(error) = result {
        tracing::error!("{error}");
        std::process::exit(1);
    }
}
