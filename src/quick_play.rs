//! Quick-play dispatch (spec §4.9): a small registry mapping an app name to
//! a thin adapter over `CastDevice::play_media`. No concrete per-app
//! adapters ship beyond the default media receiver — the spec's Non-goals
//! exclude bespoke per-vendor app support, and the teacher never needed one
//! either (punchtop only ever drove its own hardcoded app).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;

use crate::controller::media::LoadRequest;
use crate::device::CastDevice;
use crate::error::{CastError, Result};
use crate::model::StreamType;

type QuickPlayFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
type QuickPlayFn = for<'a> fn(&'a CastDevice, Value) -> QuickPlayFuture<'a>;

/// Registered app name for the default media receiver shim.
pub const DEFAULT_MEDIA_RECEIVER: &str = "default_media_receiver";

fn registry() -> HashMap<&'static str, QuickPlayFn> {
    let mut map: HashMap<&'static str, QuickPlayFn> = HashMap::new();
    map.insert(DEFAULT_MEDIA_RECEIVER, |cast, data| Box::pin(default_media_receiver(cast, data)));
    map
}

/// Launch the adapter registered for `app_name`, hand it `data`, and wait
/// for it to either finish or hit `timeout`. Unknown `app_name`s fail with
/// `CastError::NotImplemented` (spec §4.9).
pub async fn quick_play(cast: &CastDevice, app_name: &str, data: Value, timeout: Duration) -> Result<()> {
    let adapter = registry()
        .get(app_name)
        .copied()
        .ok_or_else(|| CastError::NotImplemented {
            app_name: app_name.to_owned(),
        })?;

    tokio::time::timeout(timeout, adapter(cast, data))
        .await
        .map_err(|_| CastError::RequestTimeout { operation: "quick_play" })?
}

async fn default_media_receiver(cast: &CastDevice, data: Value) -> Result<()> {
    let content_id = data
        .get("content_id")
        .or_else(|| data.get("contentId"))
        .and_then(Value::as_str)
        .ok_or(CastError::RequestFailed)?
        .to_owned();
    let content_type = data
        .get("content_type")
        .or_else(|| data.get("contentType"))
        .and_then(Value::as_str)
        .unwrap_or("video/mp4")
        .to_owned();

    let request = LoadRequest {
        content_id,
        content_type,
        stream_type: StreamType::Buffered,
        autoplay: true,
        ..Default::default()
    };

    cast.play_media(request).await?;
    Ok(())
}
