use image::DynamicImage;

/// 解码得到的单帧图像
///
/// 只在抽帧和生成描述期间存在，不落盘。
#[derive(Debug, Clone)]
pub struct Frame {
    /// 在视频中的解码序号（从 0 开始）
    pub index: usize,
    /// 时间戳（秒），无法获取时为 None
    pub timestamp: Option<f64>,
    /// RGB 图像数据
    pub image: DynamicImage,
}

impl Frame {
    pub fn new(index: usize, timestamp: Option<f64>, image: DynamicImage) -> Self {
        Self {
            index,
            timestamp,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 将逐帧描述列表序列化为文本（JSON 数组字面量），作为总结模型的输入
pub fn serialize_captions(captions: &[String]) -> String {
    // Vec<String> 的 JSON 序列化不会失败
    serde_json::to_string(captions).unwrap_or_else(|_| format!("{:?}", captions))
}
