use bytes::Buf;
use hyper::body::HttpBody;
use hyper::Body;
use rkyv::AlignedVec;

/// Collects a HTTP body into an aligned buffer ready for validation.
pub(crate) async fn to_aligned(
    mut body: Body,
) -> Result<AlignedVec, <Body as HttpBody>::Error> {
    let first = match body.data().await {
        Some(buf) => buf?,
        None => return Ok(AlignedVec::new()),
    };

    let cap = first.remaining() + body.size_hint().lower() as usize;
    let mut vec = AlignedVec::with_capacity(cap);
    vec.extend_from_slice(&first);

    while let Some(buf) = body.data().await {
        vec.extend_from_slice(&buf?);
    }

    Ok(vec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_to_aligned_multiple_chunks() {
        let (mut sender, body) = Body::channel();
        tokio::spawn(async move {
            sender.send_data("hello ".into()).await.unwrap();
            sender.send_data("world".into()).await.unwrap();
        });

        let buffer = to_aligned(body).await.unwrap();
        assert_eq!(buffer.as_slice(), b"hello world");
    }

    #[tokio::test]
    async fn test_to_aligned_empty() {
        let buffer = to_aligned(Body::empty()).await.unwrap();
        assert!(buffer.is_empty());
    }
}
