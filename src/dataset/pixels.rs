//! デコード済み画像の画素配列

use std::path::Path;

use image::{ColorType, DynamicImage};

/// 高さ × 幅 × チャネル の u8 画素配列
///
/// チャネル数は元画像の形式で決まります（グレー1、グレー+α 2、RGB 3、RGBA 4）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelArray {
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<u8>,
}

impl PixelArray {
    /// HWC順の生データから作成（長さが合わない場合は None）
    pub fn from_raw(height: usize, width: usize, channels: usize, data: Vec<u8>) -> Option<Self> {
        if channels == 0 || data.len() != height * width * channels {
            return None;
        }
        Some(Self {
            height,
            width,
            channels,
            data,
        })
    }

    pub fn from_image(img: DynamicImage) -> Self {
        let height = img.height() as usize;
        let width = img.width() as usize;
        let (channels, data) = match img.color() {
            ColorType::L8 | ColorType::L16 => (1, img.into_luma8().into_raw()),
            ColorType::La8 | ColorType::La16 => (2, img.into_luma_alpha8().into_raw()),
            ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => {
                (4, img.into_rgba8().into_raw())
            }
            _ => (3, img.into_rgb8().into_raw()),
        };
        Self {
            height,
            width,
            channels,
            data,
        }
    }

    /// ファイルを開いてデコード（ファイルはデコード後すぐに閉じられる）
    pub fn open(path: &Path) -> Result<Self, image::ImageError> {
        image::open(path).map(Self::from_image)
    }

    /// (高さ, 幅, チャネル)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// CHW順に並べ替え、0.0〜1.0 に正規化
    pub fn to_chw_f32(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.data.len());
        for channel in 0..self.channels {
            for y in 0..self.height {
                for x in 0..self.width {
                    let value = self.data[(y * self.width + x) * self.channels + channel];
                    out.push(value as f32 / 255.0);
                }
            }
        }
        out
    }
}
