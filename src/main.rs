use anyhow::Result;
use clap::Parser;
use onnx_signs::{config::Config, web::serve};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "onnx-signs")]
#[command(about = "ONNX-powered traffic sign detection service")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "0.0.0.0:5000")]
    bind: String,

    /// Model directory path
    #[arg(long, default_value = "models")]
    models_dir: String,

    /// Static file directory (uploads and annotated outputs)
    #[arg(long, default_value = "static")]
    static_dir: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable development mode
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting traffic sign detection service...");
    tracing::info!("Bind address: {}", args.bind);
    tracing::info!("Models directory: {}", args.models_dir);

    // 创建配置
    let config = Config::new(args.bind, args.models_dir, args.static_dir, args.dev);

    // 启动服务器
    serve(config).await?;

    Ok(())
}
