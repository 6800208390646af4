use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tus_laser::{config::AppConfig, logging, TusClient, UploadEngine, UploadMode};

/// 配置文件路径
const CONFIG_PATH: &str = "config/app.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load_or_default(CONFIG_PATH).await;

    // 初始化日志系统（必须保持 _log_guard 存活）
    let _log_guard = logging::init_logging(&config.log);

    info!("tus-laser v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let source_path = config
        .upload
        .source_path
        .clone()
        .context("未配置待上传文件，请在配置文件 [upload] 中设置 source_path")?;

    let client = TusClient::new(&config.server.base_url, config.server.request_timeout())
        .context("创建上传客户端失败")?;

    // 协商服务端能力
    let mut upload_config = config.upload.clone();
    let mut checksum = false;
    match client.update_capabilities().await {
        Ok(caps) => {
            if upload_config.mode == UploadMode::Concat && !caps.supports("concatenation") {
                warn!("⚠️  服务端不支持 concatenation 扩展，改用顺序上传");
                upload_config.mode = UploadMode::Sequential;
            }
            checksum = config.server.checksum && caps.supports_checksum("sha1");
        }
        Err(e) => warn!("获取服务端能力失败，按配置继续: {}", e),
    }
    let client = client.with_checksum(checksum);

    // Ctrl+C 取消上传
    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到 Ctrl+C，正在取消上传...");
            ctrl_c_token.cancel();
        }
    });

    let engine = UploadEngine::new(Arc::new(client), upload_config, cancel_token);

    match engine.upload(&source_path).await {
        Ok(session) => {
            info!("✓ 文件已上传: {:?} → {}", source_path, session.location);
            Ok(())
        }
        Err(e) => {
            error!("上传失败: {:?}, 错误: {}", source_path, e);
            Err(e).context("上传失败")
        }
    }
}
