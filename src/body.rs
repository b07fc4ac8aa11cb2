//! Response body wrapper used throughout the gateway.
//!
//! `GatewayBody` boxes any `http_body::Body` implementation behind a single
//! concrete type so routes, middleware and the upstream client can all
//! produce and consume bodies without generic parameters leaking everywhere.

use std::{
    fmt::Debug,
    pin::Pin,
    task::{Context, Poll},
};

use anyhow::Result;
use bytes::Bytes;
use futures_util::{Stream, TryStream, TryStreamExt};
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Body, Frame, SizeHint};

use crate::types::{BoxBody, BoxError};

/// A boxed, unsync HTTP body.
pub struct GatewayBody(BoxBody);

impl GatewayBody {
    pub fn new<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(|e| e.into()).boxed_unsync())
    }

    /// Builds a body from a stream of byte chunks, used for forwarding
    /// upstream responses without fully buffering them.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + Debug + 'static,
    {
        let stream = stream.map_err(Into::into).map_ok(hyper::body::Frame::data);
        Self(StreamBody::new(stream).boxed_unsync())
    }

    pub fn from_try_stream<S, E>(stream: S) -> Self
    where
        S: TryStream<Ok = Frame<Bytes>, Error = E> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self(StreamBody::new(stream.map_err(Into::into)).boxed_unsync())
    }

    pub fn empty() -> Self {
        Self::new(Empty::new())
    }
}

impl Default for GatewayBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<()> for GatewayBody {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl From<&str> for GatewayBody {
    fn from(buf: &str) -> Self {
        Self::new(http_body_util::Full::from(buf.to_owned()))
    }
}

macro_rules! body_from_impl {
    ($ty:ty) => {
        impl From<$ty> for GatewayBody {
            fn from(buf: $ty) -> Self {
                Self::new(http_body_util::Full::from(buf))
            }
        }
    };
}

body_from_impl!(String);
body_from_impl!(Vec<u8>);
body_from_impl!(Bytes);

impl Body for GatewayBody {
    type Data = Bytes;
    type Error = BoxError;

    #[inline]
    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    #[inline]
    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }

    #[inline]
    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }
}
