//! The request/response pipeline around the routing logic.
//!
//! Order on the way in: gzip decode, RSA decrypt, HMAC verify, trusted-subnet
//! check. Each step is skipped when its configuration is absent, so with an
//! empty config the whole chain degrades to pure transport. The HMAC is
//! always computed over the fully decoded body, i.e. after decompression and
//! decryption.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use http_body_util::BodyExt;
use hyper::{header, http::request::Parts};

use crate::{crypto, prelude::*};
use super::{Context, Response, response};


#[derive(Debug)]
pub(super) struct DecodedRequest {
    pub(super) body: Bytes,
    /// The verified signature, to be echoed on the response.
    pub(super) hmac_echo: Option<String>,
}

/// Applies the ingress part of the chain. Any `Err` is the response to send
/// immediately, without ever reaching a handler.
pub(super) fn decode_request(
    parts: &Parts,
    body: Bytes,
    ctx: &Context,
) -> Result<DecodedRequest, Response> {
    let body = decompress(parts, body)?;
    let body = decrypt(body, ctx)?;
    let hmac_echo = verify_signature(parts, &body, ctx)?;
    check_subnet(parts, ctx)?;

    Ok(DecodedRequest { body, hmac_echo })
}

/// Applies the egress part of the chain: the signature echo and, if the
/// client asked for it, response compression.
pub(super) async fn encode_response(
    parts: &Parts,
    mut response: Response,
    hmac_echo: Option<String>,
) -> Response {
    if let Some(signature) = hmac_echo {
        if let Ok(value) = signature.parse() {
            response.headers_mut().insert(crypto::HASH_HEADER, value);
        }
    }

    if !accepts_gzip(parts) || response.status().as_u16() >= 300 {
        return response;
    }

    let (mut head, body) = response.into_parts();
    // Our own body type cannot fail to collect.
    let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();

    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    let compressed = encoder.write_all(&body)
        .and_then(|_| encoder.finish());
    match compressed {
        Ok(compressed) => {
            head.headers.remove(header::CONTENT_LENGTH);
            head.headers.insert(header::CONTENT_ENCODING, "gzip".parse().unwrap());
            Response::from_parts(head, Bytes::from(compressed).into())
        }
        Err(e) => {
            // Compression of an in-memory buffer should never fail, but if it
            // does, the uncompressed response is still a valid answer.
            warn!("Failed to gzip response body: {e}");
            Response::from_parts(head, body.into())
        }
    }
}

fn decompress(parts: &Parts, body: Bytes) -> Result<Bytes, Response> {
    if !header_has_token(parts, header::CONTENT_ENCODING, "gzip") {
        return Ok(body);
    }

    let mut out = Vec::new();
    GzDecoder::new(body.as_ref()).read_to_end(&mut out).map_err(|e| {
        warn!("Failed to decode gzip request body: {e}");
        response::internal_server_error()
    })?;
    Ok(out.into())
}

fn decrypt(body: Bytes, ctx: &Context) -> Result<Bytes, Response> {
    let Some(key) = &ctx.rsa_key else {
        return Ok(body);
    };

    crypto::decrypt(key, &body)
        .map(Bytes::from)
        .map_err(|e| {
            warn!("Failed to decrypt request body: {e}");
            response::internal_server_error()
        })
}

/// Checks the `HashSHA256` header, if present, against the decoded body.
/// Verification happens here, before any handler runs; a request with a bad
/// signature never reaches the repository.
fn verify_signature(
    parts: &Parts,
    body: &Bytes,
    ctx: &Context,
) -> Result<Option<String>, Response> {
    let Some(key) = &ctx.hmac_key else {
        return Ok(None);
    };
    let Some(signature) = parts.headers.get(crypto::HASH_HEADER) else {
        return Ok(None);
    };

    let signature = signature.to_str().map_err(|_| {
        response::bad_request("malformed HashSHA256 header")
    })?;

    if !crypto::verify(key, body, signature) {
        debug!("Rejecting request with bad HashSHA256 signature");
        return Err(response::bad_request("bad HashSHA256 signature"));
    }

    Ok(Some(signature.to_owned()))
}

fn check_subnet(parts: &Parts, ctx: &Context) -> Result<(), Response> {
    let Some(subnet) = &ctx.trusted_subnet else {
        return Ok(());
    };

    let ip = parts.headers.get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<std::net::IpAddr>().ok());

    match ip {
        Some(ip) if subnet.contains(&ip) => Ok(()),
        Some(ip) => {
            warn!("Rejecting request from untrusted IP address {ip}");
            Err(response::forbidden())
        }
        None => {
            warn!("Rejecting request without a valid X-Real-IP header");
            Err(response::forbidden())
        }
    }
}

fn accepts_gzip(parts: &Parts) -> bool {
    let accepts_compressible_type = ["text/html", "application/json"].iter().any(|t| {
        parts.headers.get_all(header::ACCEPT).iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains(t))
    });

    accepts_compressible_type
        && header_has_token(parts, header::ACCEPT_ENCODING, "gzip")
}

fn header_has_token(parts: &Parts, name: header::HeaderName, token: &str) -> bool {
    parts.headers.get_all(name).iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim() == token)
}
