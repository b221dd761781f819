//! One function per worker command. All are blocking and run on a blocking
//! thread; none holds the cache lock across a decrypt.

use std::time::Instant;

use keepsake_core::protocol::{
    ClearedPayload, DataUrlPayload, DataUrlRequest, EvictionsPayload, MediaPathPayload,
    MediaPathRequest, ThumbnailPayload, ThumbnailRequest,
};
use keepsake_core::types::extension_for;
use keepsake_core::{ErrorKind, MediaError, MediaKind, MediaResult};
use keepsake_crypto::{
    decrypt_to_temp, decrypt_to_vec, encrypt_bytes, parallel_decrypt_to_temp,
    plaintext_len_of_file, CodecError,
};
use keepsake_store::{place_noclobber, write_noclobber, Placement};

use crate::cache::CacheKey;
use crate::state::WorkerState;
use crate::thumbnail::{data_url as encode_data_url, render_jpeg, validate_max_dimension};

const THUMBNAIL_MIME: &str = "image/jpeg";

pub fn thumbnail(state: &WorkerState, req: &ThumbnailRequest) -> MediaResult<ThumbnailPayload> {
    validate_max_dimension(req.max_dimension)?;
    if let Some(mime) = req.mime_hint.as_deref() {
        if MediaKind::from_mime(mime) != MediaKind::Image {
            return Err(MediaError::invalid_request(format!(
                "thumbnail requested for non-image mime '{mime}'"
            )));
        }
    }

    let derived = state.store.thumbnail_path(&req.address, req.max_dimension);
    if derived.is_file() {
        let key = state.master_key()?;
        match decrypt_to_vec(key, &derived) {
            Ok(jpeg) => {
                tracing::debug!(address = %req.address, max = req.max_dimension, "thumbnail cache hit");
                return Ok(ThumbnailPayload {
                    data_url: encode_data_url(THUMBNAIL_MIME, &jpeg),
                    cached: true,
                });
            }
            Err(e @ (CodecError::AuthenticationFailure { .. } | CodecError::InvalidFormat(_))) => {
                // A damaged derived file would otherwise block re-derivation forever.
                tracing::warn!(address = %req.address, path = %derived.display(), "discarding unreadable thumbnail: {e}");
                std::fs::remove_file(&derived)?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let source = state.store.require_attachment(&req.address)?;
    let declared = plaintext_len_of_file(&source)?;
    if declared > state.config.max_image_decode_bytes {
        return Err(MediaError::new(
            ErrorKind::ResourceExhausted,
            format!(
                "{} plaintext is {declared} bytes; decode limit is {}",
                req.address, state.config.max_image_decode_bytes
            ),
        ));
    }

    let key = state.master_key()?;
    let jpeg = {
        let plaintext = decrypt_to_vec(key, &source)?;
        render_jpeg(&plaintext, req.max_dimension, state.config.thumbnail_quality)?
    };
    let sealed = encrypt_bytes(key, &jpeg)?;
    let placement = write_noclobber(&derived, &sealed)?;
    tracing::debug!(
        address = %req.address,
        max = req.max_dimension,
        bytes = jpeg.len(),
        raced = placement == Placement::AlreadyPresent,
        "thumbnail derived"
    );

    Ok(ThumbnailPayload {
        data_url: encode_data_url(THUMBNAIL_MIME, &jpeg),
        cached: false,
    })
}

pub fn media_path(state: &WorkerState, req: &MediaPathRequest) -> MediaResult<MediaPathPayload> {
    let extension = extension_for(req.mime_hint.as_deref());
    let cache_key = CacheKey::new(req.address.clone(), extension);
    if let Some(path) = state.cache().lookup(&cache_key, Instant::now()) {
        tracing::debug!(address = %req.address, "session file cache hit");
        return Ok(MediaPathPayload { path });
    }

    let source = state.store.require_attachment(&req.address)?;
    let key = state.master_key()?;
    let plaintext_len = plaintext_len_of_file(&source)?;
    let dir = state.store.session_media_dir();
    std::fs::create_dir_all(dir)?;

    let started = Instant::now();
    let parallel = plaintext_len >= state.config.parallel_decrypt_threshold_bytes;
    let tmp = if parallel {
        parallel_decrypt_to_temp(key, &source, dir, state.config.parallel_decrypt_workers)?
    } else {
        decrypt_to_temp(key, &source, dir)?
    };

    let dst = state.store.session_media_path(&req.address, extension);
    place_noclobber(tmp, &dst)?;
    tracing::debug!(
        address = %req.address,
        bytes = plaintext_len,
        parallel,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "session file ready"
    );

    state.cache().insert(cache_key, dst.clone(), Instant::now());
    Ok(MediaPathPayload { path: dst })
}

pub fn data_url(state: &WorkerState, req: &DataUrlRequest) -> MediaResult<DataUrlPayload> {
    let kind = MediaKind::from_mime(&req.mime_hint);
    let mut ceiling = state.config.data_url_ceiling(kind);
    if let Some(cap) = req.max_bytes {
        ceiling = ceiling.min(cap);
    }

    let source = state.store.require_attachment(&req.address)?;
    let plaintext_len = plaintext_len_of_file(&source)?;
    if plaintext_len > ceiling {
        return Err(MediaError::new(
            ErrorKind::TooLarge,
            format!("{} is {plaintext_len} bytes; inline limit is {ceiling}", req.address),
        ));
    }

    let key = state.master_key()?;
    let plaintext = decrypt_to_vec(key, &source)?;
    let mime = match req.mime_hint.trim() {
        "" => "application/octet-stream",
        m => m,
    };
    Ok(DataUrlPayload {
        data_url: encode_data_url(mime, &plaintext),
    })
}

pub fn clear_cache(state: &WorkerState) -> ClearedPayload {
    let removed = state.cache().clear();
    tracing::debug!(removed, "worker cache cleared");
    ClearedPayload { cleared: true }
}

pub fn drain_evictions(state: &WorkerState) -> EvictionsPayload {
    EvictionsPayload {
        addresses: state.cache().drain_evictions(),
    }
}
