/*
 * Copyright 2024 Google LLC
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Extraction of the server name from a TLS ClientHello, without consuming
//! it from the connection.

use std::{io, time::Duration};

use nom::{
    bytes::{complete, streaming},
    multi::length_data,
    number::{
        complete::{be_u16, be_u24, be_u8},
        streaming::be_u16 as streaming_be_u16,
    },
    IResult,
};
use tokio::net::TcpStream;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST_NAME: u8 = 0x00;

/// The most bytes inspected, the largest possible TLS record plus its header.
pub const MAX_CLIENT_HELLO: usize = 5 + (1 << 14);

/// How long to wait between peeks while the ClientHello is incomplete.
const PEEK_INTERVAL: Duration = Duration::from_millis(5);

/// What the start of a connection revealed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientHello {
    /// A ClientHello with a host name, lowercased.
    ServerName(String),
    /// A ClientHello without a usable host name.
    NoServerName,
    /// Not the start of a TLS handshake.
    NotTls,
    /// Too little data to tell yet.
    Incomplete,
}

impl ClientHello {
    pub fn server_name(self) -> Option<String> {
        match self {
            Self::ServerName(name) => Some(name),
            _ => None,
        }
    }
}

/// Parses the first TLS record of a connection.
pub fn parse(input: &[u8]) -> ClientHello {
    match input.first() {
        None => return ClientHello::Incomplete,
        Some(&CONTENT_TYPE_HANDSHAKE) => {}
        Some(_) => return ClientHello::NotTls,
    }

    let body = match record(input) {
        Ok((_, body)) => body,
        Err(nom::Err::Incomplete(_)) => return ClientHello::Incomplete,
        Err(_) => return ClientHello::NotTls,
    };

    if body.first() != Some(&HANDSHAKE_CLIENT_HELLO) {
        return ClientHello::NotTls;
    }

    match client_hello(body) {
        Ok((_, Some(name))) => ClientHello::ServerName(name),
        Ok((_, None)) | Err(_) => ClientHello::NoServerName,
    }
}

fn record(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, _) = streaming::tag(&[CONTENT_TYPE_HANDSHAKE][..])(input)?;
    let (input, _version) = streaming_be_u16(input)?;
    length_data(streaming_be_u16)(input)
}

fn client_hello(input: &[u8]) -> IResult<&[u8], Option<String>> {
    let (input, _) = complete::tag(&[HANDSHAKE_CLIENT_HELLO][..])(input)?;
    let (input, hello) = length_data(be_u24)(input)?;

    let (hello, _version) = be_u16(hello)?;
    let (hello, _random) = complete::take(32usize)(hello)?;
    let (hello, _session_id) = length_data(be_u8)(hello)?;
    let (hello, _cipher_suites) = length_data(be_u16)(hello)?;
    let (hello, _compression_methods) = length_data(be_u8)(hello)?;

    if hello.is_empty() {
        return Ok((input, None));
    }

    let (_, mut extensions) = length_data(be_u16)(hello)?;
    while !extensions.is_empty() {
        let (rest, kind) = be_u16(extensions)?;
        let (rest, data) = length_data(be_u16)(rest)?;

        if kind == EXTENSION_SERVER_NAME {
            let (_, name) = server_name(data)?;
            return Ok((input, name));
        }

        extensions = rest;
    }

    Ok((input, None))
}

fn server_name(input: &[u8]) -> IResult<&[u8], Option<String>> {
    let (input, mut names) = length_data(be_u16)(input)?;

    while !names.is_empty() {
        let (rest, name_type) = be_u8(names)?;
        let (rest, name) = length_data(be_u16)(rest)?;

        if name_type == NAME_TYPE_HOST_NAME {
            let name = std::str::from_utf8(name)
                .ok()
                .filter(|name| !name.is_empty() && name.is_ascii())
                .map(str::to_ascii_lowercase);
            return Ok((input, name));
        }

        names = rest;
    }

    Ok((input, None))
}

/// Peeks at the start of `stream` until the ClientHello can be parsed, the
/// peer stops sending, or `timeout` elapses. Nothing is consumed from the
/// stream.
pub async fn peek_server_name(stream: &TcpStream, timeout: Duration) -> io::Result<ClientHello> {
    let mut buffer = vec![0; MAX_CLIENT_HELLO];

    let inspect = async {
        loop {
            let read = stream.peek(&mut buffer).await?;
            if read == 0 {
                return Ok(ClientHello::NotTls);
            }

            match parse(&buffer[..read]) {
                ClientHello::Incomplete if read < buffer.len() => {
                    tokio::time::sleep(PEEK_INTERVAL).await;
                }
                ClientHello::Incomplete => return Ok(ClientHello::NoServerName),
                hello => return Ok::<_, io::Error>(hello),
            }
        }
    };

    match tokio::time::timeout(timeout, inspect).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(?timeout, "timed out waiting for a ClientHello");
            Ok(ClientHello::Incomplete)
        }
    }
}
