//! HTTPS firmware transfer implementing the core `UpdateTransport`.
//!
//! The image descriptor lives at a fixed offset in the ESP image layout:
//! 24-byte image header, 8-byte segment header, then the 256-byte
//! `esp_app_desc_t`. The first 288 bytes are buffered and parsed before
//! anything touches flash; once validation passes they are replayed into
//! the partition ahead of the remaining stream.

use std::time::Duration;

use embedded_svc::http::client::Connection;
use embedded_svc::http::Method;
use embedded_svc::io::Read;
use esp_idf_svc::http::client::{Configuration as HttpConfiguration, EspHttpConnection};

use station_core::{ChunkStatus, FinishError, ImageDescriptor, TransportError, UpdateTransport};

use super::flash::OtaFlashWriter;

/// Image header + one segment header; the app descriptor follows.
const APP_DESC_OFFSET: usize = 24 + 8;
/// `esp_app_desc_t` is 256 bytes.
const APP_DESC_LEN: usize = 256;
const DESC_PREFIX_LEN: usize = APP_DESC_OFFSET + APP_DESC_LEN;

const ESP_IMAGE_MAGIC: u8 = 0xE9;
const APP_DESC_MAGIC: u32 = 0xABCD_5432;

const CHUNK_SIZE: usize = 4096;
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpsOtaTransport;

pub struct OtaTransferSession {
    conn: EspHttpConnection,
    content_length: Option<usize>,
    prefix: Vec<u8>,
    flash: Option<OtaFlashWriter>,
    bytes_read: usize,
}

impl UpdateTransport for HttpsOtaTransport {
    type Session = OtaTransferSession;

    fn open(&mut self, source: &str) -> Result<OtaTransferSession, TransportError> {
        let mut conn = EspHttpConnection::new(&HttpConfiguration {
            timeout: Some(HTTP_TIMEOUT),
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            ..Default::default()
        })
        .map_err(|e| TransportError(format!("http client init: {}", e)))?;

        conn.initiate_request(Method::Get, source, &[])
            .map_err(|e| TransportError(format!("request failed: {}", e)))?;
        conn.initiate_response()
            .map_err(|e| TransportError(format!("no response: {}", e)))?;

        let status = conn.status();
        if status != 200 {
            return Err(TransportError(format!("server returned HTTP {}", status)));
        }
        let content_length = conn
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<usize>().ok());

        Ok(OtaTransferSession {
            conn,
            content_length,
            prefix: Vec::new(),
            flash: None,
            bytes_read: 0,
        })
    }

    fn read_descriptor(
        &mut self,
        session: &mut OtaTransferSession,
    ) -> Result<ImageDescriptor, TransportError> {
        let mut prefix = vec![0u8; DESC_PREFIX_LEN];
        let mut filled = 0;
        while filled < DESC_PREFIX_LEN {
            let n = session
                .conn
                .read(&mut prefix[filled..])
                .map_err(|e| TransportError(format!("descriptor read: {}", e)))?;
            if n == 0 {
                return Err(TransportError(format!(
                    "stream ended after {} bytes, descriptor needs {}",
                    filled, DESC_PREFIX_LEN
                )));
            }
            filled += n;
        }

        let descriptor = parse_descriptor(&prefix)?;
        session.prefix = prefix;
        Ok(descriptor)
    }

    fn read_next_chunk(
        &mut self,
        session: &mut OtaTransferSession,
    ) -> Result<ChunkStatus, TransportError> {
        if session.flash.is_none() {
            let mut flash = OtaFlashWriter::begin(session.content_length)
                .map_err(|e| TransportError(format!("flash begin: {:?}", e)))?;
            flash
                .write(&session.prefix)
                .map_err(|e| TransportError(format!("flash write: {:?}", e)))?;
            session.bytes_read = session.prefix.len();
            session.flash = Some(flash);
        }
        let Some(flash) = session.flash.as_mut() else {
            return Err(TransportError("flash writer missing".into()));
        };

        let mut buf = [0u8; CHUNK_SIZE];
        let n = session
            .conn
            .read(&mut buf)
            .map_err(|e| TransportError(format!("chunk read: {}", e)))?;
        if n == 0 {
            return Ok(ChunkStatus::Done);
        }

        flash
            .write(&buf[..n])
            .map_err(|e| TransportError(format!("flash write: {:?}", e)))?;
        session.bytes_read += n;
        Ok(ChunkStatus::InProgress {
            bytes_read: session.bytes_read,
        })
    }

    fn is_complete(&mut self, session: &OtaTransferSession) -> bool {
        match session.content_length {
            Some(len) => session.bytes_read == len,
            // No Content-Length: a truncated stream is indistinguishable
            // from a clean EOF here. `esp_ota_end` validates the image
            // structure at finish and rejects a truncated one.
            None => session.bytes_read > 0,
        }
    }

    fn finish(&mut self, session: OtaTransferSession) -> Result<(), FinishError> {
        match session.flash {
            Some(flash) => {
                log::info!("finalizing image, {} bytes written", flash.bytes_written());
                flash.finish()
            }
            None => Err(FinishError::Corrupt("no image data received".into())),
        }
    }

    fn abort(&mut self, session: OtaTransferSession) {
        if let Some(flash) = session.flash {
            flash.abort();
        }
        // Dropping the connection closes the HTTP session.
    }
}

fn parse_descriptor(prefix: &[u8]) -> Result<ImageDescriptor, TransportError> {
    if prefix[0] != ESP_IMAGE_MAGIC {
        return Err(TransportError(format!(
            "not an ESP image (magic 0x{:02x})",
            prefix[0]
        )));
    }

    let desc = &prefix[APP_DESC_OFFSET..];
    let magic = u32::from_le_bytes([desc[0], desc[1], desc[2], desc[3]]);
    if magic != APP_DESC_MAGIC {
        return Err(TransportError(format!(
            "app descriptor magic mismatch (0x{:08x})",
            magic
        )));
    }

    let security_version = u32::from_le_bytes([desc[4], desc[5], desc[6], desc[7]]);
    // esp_app_desc_t: magic, secure_version, reserv1[2], version[32], ...
    let version = cstr_field(&desc[16..48]);
    let chip_id = u16::from_le_bytes([prefix[12], prefix[13]]);

    Ok(ImageDescriptor {
        version,
        security_version,
        target_hardware: chip_name(chip_id).to_string(),
    })
}

fn cstr_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn chip_name(chip_id: u16) -> &'static str {
    match chip_id {
        0x0000 => "esp32",
        0x0002 => "esp32s2",
        0x0005 => "esp32c3",
        0x0009 => "esp32s3",
        0x000C => "esp32c2",
        0x000D => "esp32c6",
        0x0010 => "esp32h2",
        _ => "unknown",
    }
}
