use crate::detect::types::ModelKind;
use crate::models::Detector;
use crate::{Config, Result};

/// 两个检测模型，进程启动时显式构造一次，
/// 通过应用状态注入请求处理路径，跨请求只读共享。
pub struct ModelRegistry {
    speed_signal: Detector,
    general: Detector,
}

impl ModelRegistry {
    pub fn load(config: &Config) -> Result<Self> {
        tracing::info!("Loading detection models...");

        let speed_signal = Detector::new(config, &config.speed_signal_model_path())?;
        let general = Detector::new(config, &config.general_model_path())?;

        tracing::info!("Detection models loaded successfully");
        Ok(Self { speed_signal, general })
    }

    /// 固定的模型顺序：先红绿灯/限速，后通用标志。
    /// 标签列表与绘制顺序都依赖这一顺序。
    pub fn in_order(&self) -> [(ModelKind, &Detector); 2] {
        [
            (ModelKind::SpeedSignal, &self.speed_signal),
            (ModelKind::General, &self.general),
        ]
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            models: vec![
                ModelStats {
                    model: ModelKind::SpeedSignal,
                    classes: self.speed_signal.num_classes(),
                },
                ModelStats {
                    model: ModelKind::General,
                    classes: self.general.num_classes(),
                },
            ],
        }
    }
}

/// 模型统计信息
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub models: Vec<ModelStats>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelStats {
    pub model: ModelKind,
    pub classes: usize,
}
