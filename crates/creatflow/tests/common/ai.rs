//! Deterministic AI provider for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

use creatflow::adapt::engine::encode;
use creatflow::adapt::metadata::{DetectedObject, FaceBox};
use creatflow::adapt::SourceFormat;
use creatflow::ai::{AiError, AiProvider, GeneratedImage};

/// Answers detection from fixed lists and generative calls with a flat
/// image of the requested size. Every call is counted.
#[derive(Default)]
pub struct ScriptedAi {
    pub faces: Vec<FaceBox>,
    pub objects: Vec<DetectedObject>,
    pub nsfw: bool,
    /// Generative calls fail while this is above zero, counting down.
    pub failures_left: AtomicUsize,
    pub resize_calls: AtomicUsize,
    pub edit_calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedAi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    fn take_failure(&self) -> Result<(), AiError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(());
        }
        self.failures_left.store(left - 1, Ordering::SeqCst);
        Err(AiError::Api {
            status: 503,
            body: "model overloaded".to_string(),
        })
    }

    fn flat(width: u32, height: u32) -> GeneratedImage {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 160, 90])));
        GeneratedImage {
            bytes: encode(&image, SourceFormat::Png).expect("encode flat image"),
            mime_type: "image/png".to_string(),
        }
    }
}

impl AiProvider for ScriptedAi {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect_faces(&self, _image: &Path) -> Result<Vec<FaceBox>, AiError> {
        Ok(self.faces.clone())
    }

    fn detect_objects(&self, _image: &Path) -> Result<Vec<DetectedObject>, AiError> {
        Ok(self.objects.clone())
    }

    fn detect_nsfw(&self, _image: &Path) -> Result<bool, AiError> {
        Ok(self.nsfw)
    }

    fn resize_image(
        &self,
        _image: &Path,
        width: u32,
        height: u32,
        prompt: Option<&str>,
    ) -> Result<GeneratedImage, AiError> {
        self.resize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(prompt) = prompt {
            self.prompts.lock().unwrap().push(prompt.to_string());
        }
        self.take_failure()?;
        Ok(Self::flat(width, height))
    }

    fn edit_image(&self, image: &Path, prompt: &str) -> Result<GeneratedImage, AiError> {
        self.edit_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.take_failure()?;
        let (width, height) = image::open(image)
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?
            .dimensions();
        Ok(Self::flat(width, height))
    }
}
