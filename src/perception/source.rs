//! Frame sources and classifiers

use async_trait::async_trait;
use gesture_flight_shared::GestureLabel;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// Produces frames for the perception loop
#[async_trait]
pub trait FrameSource: Send {
    type Frame: Send + Sync;

    /// Next frame; `Ok(None)` at end of stream
    async fn next_frame(&mut self) -> anyhow::Result<Option<Self::Frame>>;
}

/// Maps one frame to at most one label
pub trait Classifier<F>: Send {
    /// `None` means nothing was detected in this frame
    fn classify(&self, frame: &F) -> Option<GestureLabel>;
}

/// One frame per line of text, typically stdin fed by an external classifier
pub struct LineSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R> FrameSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    type Frame = String;

    async fn next_frame(&mut self) -> anyhow::Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}

/// Treats the trimmed line itself as the label
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelClassifier;

impl Classifier<String> for LabelClassifier {
    fn classify(&self, frame: &String) -> Option<GestureLabel> {
        match frame.trim() {
            "" | "-" | "none" => None,
            label => Some(GestureLabel::new(label)),
        }
    }
}
