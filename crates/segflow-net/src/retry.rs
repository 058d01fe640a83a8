use std::{thread::sleep, time::Duration};

use bytes::Bytes;
#[cfg(test)]
use unimock::unimock;
use tracing::debug;
use url::Url;

use crate::{
    ByteStream,
    error::{NetError, NetResult},
    traits::Net,
    types::{Headers, RangeSpec, RetryPolicy},
};

#[cfg_attr(test, unimock(api = RetryPolicyMock))]
pub trait RetryPolicyTrait: Send + Sync {
    fn should_retry(&self, error: &NetError, attempt: u32) -> bool;
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
    fn max_attempts(&self) -> u32;
}

pub struct DefaultRetryPolicy {
    policy: RetryPolicy,
}

impl DefaultRetryPolicy {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl RetryPolicyTrait for DefaultRetryPolicy {
    fn should_retry(&self, error: &NetError, attempt: u32) -> bool {
        attempt < self.policy.max_retries && error.is_retryable()
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.policy.delay_for_attempt(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_retries
    }
}

/// Retry decorator for Net implementations
pub struct RetryNet<N, P> {
    inner: N,
    retry_policy: P,
}

impl<N: Net, P: RetryPolicyTrait> RetryNet<N, P> {
    pub fn new(inner: N, retry_policy: P) -> Self {
        Self {
            inner,
            retry_policy,
        }
    }

    pub fn inner(&self) -> &N {
        &self.inner
    }

    fn run<T>(&self, what: &str, mut op: impl FnMut() -> NetResult<T>) -> NetResult<T> {
        let max_attempts = self.retry_policy.max_attempts();
        let mut last_error = None;

        for attempt in 0..=max_attempts {
            match op() {
                Ok(out) => return Ok(out),
                Err(error) => {
                    if !self.retry_policy.should_retry(&error, attempt) {
                        if attempt < max_attempts || max_attempts == 0 {
                            return Err(error);
                        }
                        last_error = Some(error);
                        break;
                    }
                    debug!(what, attempt, %error, "net: retrying");
                    last_error = Some(error);

                    if attempt < max_attempts {
                        sleep(self.retry_policy.delay_for_attempt(attempt + 1));
                    }
                }
            }
        }

        let source = last_error.unwrap_or(NetError::Timeout);
        Err(NetError::RetryExhausted {
            max_retries: max_attempts,
            source: Box::new(source),
        })
    }
}

impl<N: Net, P: RetryPolicyTrait> Net for RetryNet<N, P> {
    fn get_bytes(&self, url: Url, headers: Option<Headers>) -> NetResult<Bytes> {
        self.run("get_bytes", || {
            self.inner.get_bytes(url.clone(), headers.clone())
        })
    }

    fn stream(&self, url: Url, headers: Option<Headers>) -> NetResult<ByteStream> {
        self.run("stream", || self.inner.stream(url.clone(), headers.clone()))
    }

    fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> NetResult<ByteStream> {
        self.run("get_range", || {
            self.inner.get_range(url.clone(), range, headers.clone())
        })
    }

    fn head(&self, url: Url, headers: Option<Headers>) -> NetResult<Headers> {
        self.run("head", || self.inner.head(url.clone(), headers.clone()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use unimock::{MockFn, Unimock, matching};

    use super::*;
    use crate::traits::NetMock;

    fn fast_policy(max_retries: u32) -> DefaultRetryPolicy {
        DefaultRetryPolicy::new(RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_retries,
        })
    }

    fn url() -> Url {
        Url::parse("http://test.com").unwrap()
    }

    #[rstest]
    #[case(0, true)]
    #[case(2, true)]
    #[case(3, false)]
    fn test_default_retry_policy_attempt_limit(#[case] attempt: u32, #[case] expected: bool) {
        let policy = DefaultRetryPolicy::new(RetryPolicy::default());
        assert_eq!(policy.should_retry(&NetError::Timeout, attempt), expected);
    }

    #[rstest]
    fn test_default_retry_policy_non_retryable() {
        let policy = DefaultRetryPolicy::new(RetryPolicy::default());
        let error = NetError::http_status(404, "http://test.com".into());
        assert!(!policy.should_retry(&error, 0));
    }

    #[rstest]
    fn test_retry_net_get_bytes_retry_then_success() {
        let mock = Unimock::new((
            NetMock::get_bytes
                .next_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
            NetMock::get_bytes
                .next_call(matching!(_, _))
                .returns(Err(NetError::http_status(503, "http://test.com".into()))),
            NetMock::get_bytes
                .next_call(matching!(_, _))
                .returns(Ok(Bytes::from("success"))),
        ));
        let retry_net = RetryNet::new(mock, fast_policy(3));

        let result = retry_net.get_bytes(url(), None).unwrap();
        assert_eq!(result, Bytes::from("success"));
    }

    #[rstest]
    fn test_retry_net_non_retryable_error_returned_as_is() {
        let mock = Unimock::new(
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Err(NetError::http_status(404, "http://test.com".into()))),
        );
        let retry_net = RetryNet::new(mock, fast_policy(3));

        let err = retry_net.head(url(), None).unwrap_err();
        assert_eq!(err.status_code(), Some(404));
    }

    #[rstest]
    fn test_retry_net_exhausts_attempts() {
        let mock = Unimock::new(
            NetMock::get_bytes
                .each_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
        );
        let retry_net = RetryNet::new(mock, fast_policy(2));

        let err = retry_net.get_bytes(url(), None).unwrap_err();
        assert!(matches!(
            err,
            NetError::RetryExhausted { max_retries: 2, ref source } if **source == NetError::Timeout
        ));
    }

    #[rstest]
    fn test_retry_net_get_range_success() {
        let mock = Unimock::new(
            NetMock::get_range
                .some_call(matching!(_, _, _))
                .answers(&|_, _, range, _| {
                    assert_eq!(range.to_header_value(), "bytes=0-3");
                    Ok(ByteStream::from_bytes(Bytes::from_static(b"abcd")))
                }),
        );
        let retry_net = RetryNet::new(mock, fast_policy(1));

        let body = retry_net
            .get_range(url(), RangeSpec::new(0, Some(3)), None)
            .unwrap()
            .collect_bytes()
            .unwrap();
        assert_eq!(&body[..], b"abcd");
    }
}
