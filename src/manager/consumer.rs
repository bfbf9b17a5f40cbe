//! The single task with write access to the renderer (SPEC_FULL §4.4
//! "Only the consumer calls into the renderer").

use tokio::sync::mpsc;

use crate::render::Renderer;

use super::QueueItem;

pub(super) async fn run(mut rx: mpsc::Receiver<QueueItem>, mut renderer: Box<dyn Renderer + Send>) {
    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Entry(entry) => renderer.render(&entry),
            QueueItem::Warning(text) => renderer.warn(&text),
            QueueItem::Error(text) => renderer.error(&text),
        }
    }
}
