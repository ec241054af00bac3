use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// 服务器绑定地址
    pub bind_addr: String,

    /// 模型文件目录
    pub models_dir: PathBuf,

    /// 静态文件目录（上传与标注输出）
    pub static_dir: PathBuf,

    /// 开发模式
    pub dev_mode: bool,

    /// ONNX Runtime配置
    pub onnx_config: OnnxConfig,

    /// 服务器配置
    pub server_config: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// CPU线程数
    pub intra_threads: usize,

    /// 置信度阈值（含下界）
    pub confidence_threshold: f32,

    /// NMS交并比阈值
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 请求超时时间（秒）
    pub request_timeout: u64,

    /// 最大请求体大小（字节）
    pub max_request_size: usize,
}

impl Config {
    pub fn new(
        bind_addr: String,
        models_dir: String,
        static_dir: String,
        dev_mode: bool,
    ) -> Self {
        let cpu_cores = num_cpus::get();

        let onnx_config = OnnxConfig {
            intra_threads: (cpu_cores * 3 / 4).max(1), // 使用75%的CPU核心
            confidence_threshold: 0.20,
            iou_threshold: 0.45,
        };

        let server_config = ServerConfig {
            request_timeout: if dev_mode { 300 } else { 60 }, // 开发模式更长超时
            max_request_size: 50 * 1024 * 1024, // 50MB
        };

        Self {
            bind_addr,
            models_dir: PathBuf::from(models_dir),
            static_dir: PathBuf::from(static_dir),
            dev_mode,
            onnx_config,
            server_config,
        }
    }

    /// 获取红绿灯/限速模型路径
    pub fn speed_signal_model_path(&self) -> PathBuf {
        self.models_dir.join("speed_signal.onnx")
    }

    /// 获取通用交通标志模型路径
    pub fn general_model_path(&self) -> PathBuf {
        self.models_dir.join("general.onnx")
    }

    /// 上传目录
    pub fn upload_dir(&self) -> PathBuf {
        self.static_dir.join("uploads")
    }

    /// 标注输出目录
    pub fn output_dir(&self) -> PathBuf {
        self.static_dir.join("outputs")
    }

    /// 启动时创建上传与输出目录（幂等）
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.upload_dir())?;
        std::fs::create_dir_all(self.output_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::new(
            "127.0.0.1:5000".to_string(),
            "models".to_string(),
            "static".to_string(),
            false,
        )
    }

    #[test]
    fn model_paths_live_under_models_dir() {
        let config = test_config();
        assert_eq!(
            config.speed_signal_model_path(),
            PathBuf::from("models/speed_signal.onnx")
        );
        assert_eq!(config.general_model_path(), PathBuf::from("models/general.onnx"));
    }

    #[test]
    fn upload_and_output_dirs_live_under_static_dir() {
        let config = test_config();
        assert_eq!(config.upload_dir(), PathBuf::from("static/uploads"));
        assert_eq!(config.output_dir(), PathBuf::from("static/outputs"));
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.static_dir = tmp.path().join("static");

        config.ensure_dirs().unwrap();
        config.ensure_dirs().unwrap();

        assert!(config.upload_dir().is_dir());
        assert!(config.output_dir().is_dir());
    }

    #[test]
    fn confidence_threshold_is_fixed_at_point_two() {
        let config = test_config();
        assert_eq!(config.onnx_config.confidence_threshold, 0.20);
    }
}
