//! Property-based round-trips against a live canned origin.

mod common;

use proptest::collection::vec;
use proptest::prelude::*;

use common::{read_request, write_response, Origin};
use halyard::http::{HeaderMap, Method};
use halyard::{Body, Client, DownloadOptions, RequestOptions};

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn fixed_length_response(body: &[u8]) -> Vec<u8> {
    let mut resp = format!("HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n", body.len()).into_bytes();
    resp.extend_from_slice(body);
    resp
}

fn chunked_response(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut resp = b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n".to_vec();
    for chunk in chunks {
        resp.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        resp.extend_from_slice(chunk);
        resp.extend_from_slice(b"\r\n");
    }
    resp.extend_from_slice(b"0\r\n\r\n");
    resp
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 12,
        ..ProptestConfig::default()
    })]

    /// Bytes received equal bytes declared, for any correct Content-Length.
    #[test]
    fn prop_fixed_length_roundtrip(body in vec(any::<u8>(), 0..4096)) {
        let expected = body.clone();
        rt().block_on(async move {
            let origin = Origin::start(move |mut stream, _| {
                let body = body.clone();
                async move {
                    let _ = read_request(&mut stream).await.unwrap();
                    write_response(&mut stream, &fixed_length_response(&body)).await;
                }
            })
            .await;

            let client = Client::new();
            let response = client
                .request(
                    origin.dest(),
                    Method::GET,
                    "/",
                    HeaderMap::new(),
                    Body::empty(),
                    RequestOptions::default(),
                )
                .await
                .unwrap();
            assert_eq!(&response.body_bytes().unwrap()[..], &expected[..]);
        });
    }

    /// Chunked encoding over arbitrary chunk boundaries decodes to the
    /// identity byte string.
    #[test]
    fn prop_chunked_roundtrip(chunks in vec(vec(any::<u8>(), 1..256), 1..6)) {
        let expected: Vec<u8> = chunks.iter().flatten().copied().collect();
        rt().block_on(async move {
            let origin = Origin::start(move |mut stream, _| {
                let chunks = chunks.clone();
                async move {
                    let _ = read_request(&mut stream).await.unwrap();
                    write_response(&mut stream, &chunked_response(&chunks)).await;
                }
            })
            .await;

            let client = Client::new();
            let response = client
                .request(
                    origin.dest(),
                    Method::GET,
                    "/",
                    HeaderMap::new(),
                    Body::empty(),
                    RequestOptions::default(),
                )
                .await
                .unwrap();
            assert_eq!(&response.body_bytes().unwrap()[..], &expected[..]);
        });
    }

    /// Streamed downloads deliver the same bytes as complete ones, under
    /// any window and part size.
    #[test]
    fn prop_streamed_download_matches(
        body in vec(any::<u8>(), 1..2048),
        part_size in 1usize..300,
        window in 1usize..4,
    ) {
        let expected = body.clone();
        rt().block_on(async move {
            let origin = Origin::start(move |mut stream, _| {
                let body = body.clone();
                async move {
                    let _ = read_request(&mut stream).await.unwrap();
                    write_response(&mut stream, &fixed_length_response(&body)).await;
                }
            })
            .await;

            let client = Client::new();
            let options = RequestOptions {
                download: Some(DownloadOptions {
                    window: Some(window),
                    part_size,
                }),
                ..Default::default()
            };
            let response = client
                .request(
                    origin.dest(),
                    Method::GET,
                    "/",
                    HeaderMap::new(),
                    Body::empty(),
                    options,
                )
                .await
                .unwrap();
            let mut reader = response.into_reader().unwrap();
            let streamed = reader.read_to_end().await.unwrap();
            assert_eq!(&streamed[..], &expected[..]);
        });
    }
}
