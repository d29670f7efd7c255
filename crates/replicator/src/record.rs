// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The replicated request and its byte encoding.

use bincode::{Decode, Encode, config};
use snafu::{ResultExt, Snafu, ensure};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    #[snafu(display("failed to encode record"))]
    Encode {
        source: bincode::error::EncodeError,
    },

    #[snafu(display("failed to decode record"))]
    Decode {
        source: bincode::error::DecodeError,
    },

    #[snafu(display("{trailing} trailing bytes after a complete record"))]
    TrailingBytes { trailing: usize },
}

/// One inbound HTTP request, as replayed against every endpoint-group.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Record {
    pub method: String,
    /// Path and query of the inbound request, never an authority.
    pub url:    String,
    pub body:   Vec<u8>,
}

impl Record {
    pub fn new(method: impl Into<String>, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: method.into(),
            url:    url.into(),
            body:   body.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::encode_to_vec(self, config::standard()).context(EncodeSnafu)
    }

    /// Decode exactly one record; leftover bytes are an error.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (record, read): (Self, usize) =
            bincode::decode_from_slice(data, config::standard()).context(DecodeSnafu)?;
        ensure!(
            read == data.len(),
            TrailingBytesSnafu {
                trailing: data.len() - read,
            }
        );
        Ok(record)
    }
}
