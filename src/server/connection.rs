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

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::{BufMut, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::{
    filters::{ConnectionContext, Filter, FilterError},
    listener::{Binding, ConnectionInfo, Dispatcher, ListenerInstance},
    net::sni,
    signal::ShutdownRx,
};

/// Binds an accepted connection to a filter chain and runs the chain until
/// either side closes it.
pub(super) async fn handle(
    stream: TcpStream,
    source: SocketAddr,
    accepting: Arc<ListenerInstance>,
    dispatcher: Dispatcher,
    server_name_timeout: Duration,
    shutdown_rx: ShutdownRx,
) {
    let local = match stream.local_addr() {
        Ok(local) => local,
        Err(error) => {
            tracing::debug!(%error, %source, "connection closed before dispatch");
            return;
        }
    };

    let config = accepting.config();

    let server_name = if config.inspect_server_name {
        match sni::peek_server_name(&stream, server_name_timeout).await {
            Ok(hello) => hello.server_name(),
            Err(error) => {
                tracing::debug!(%error, %source, "failed to inspect connection");
                None
            }
        }
    } else {
        None
    };

    let original_destination = if config.use_original_dst {
        match crate::net::original_destination(&stream) {
            Ok(destination) => Some(destination),
            Err(error) => {
                tracing::trace!(%error, %source, "no original destination");
                None
            }
        }
    } else {
        None
    };

    let info = ConnectionInfo::new(source, local)
        .with_original_destination(original_destination)
        .with_server_name(server_name);

    let Some(binding) = dispatcher.dispatch_on(&accepting, &info).binding() else {
        return;
    };

    if let Err(error) = serve(stream, &binding, shutdown_rx).await {
        tracing::debug!(
            %error,
            %source,
            listener = %binding.listener().name(),
            chain = %binding.chain().name(),
            "connection closed"
        );
    }
}

async fn serve(
    mut stream: TcpStream,
    binding: &Binding,
    mut shutdown_rx: ShutdownRx,
) -> Result<(), FilterError> {
    let filters = binding.filters();
    if filters.is_empty() {
        return Ok(());
    }

    let limit = binding.buffer_limit();
    let mut ctx = binding.context();

    filters.on_new_connection(&mut ctx).await?;
    respond(&mut stream, &mut ctx).await?;

    loop {
        let remaining = limit.saturating_sub(ctx.contents.len());
        if remaining == 0 {
            return Err(FilterError::Custom("buffer limit exceeded"));
        }

        let read = tokio::select! {
            read = read_limited(&mut stream, &mut ctx.contents, remaining) => read?,
            _ = binding.closed() => {
                tracing::debug!(listener = %binding.listener().name(), "listener retired, closing connection");
                return Ok(());
            }
            _ = shutdown_rx.changed() => return Ok(()),
        };

        if read == 0 {
            return Ok(());
        }

        filters.on_data(&mut ctx).await?;
        respond(&mut stream, &mut ctx).await?;
    }
}

async fn read_limited(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    limit: usize,
) -> io::Result<usize> {
    let mut limited = BufMut::limit(buffer, limit);
    stream.read_buf(&mut limited).await
}

async fn respond(stream: &mut TcpStream, ctx: &mut ConnectionContext) -> io::Result<()> {
    if !ctx.response.is_empty() {
        stream.write_all(&ctx.take_response()).await?;
    }

    Ok(())
}
