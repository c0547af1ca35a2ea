use log::{debug, warn};
use std::sync::Arc;
use vpcore::candidates::CandidateFlush;
use vpcore::error::NegotiationError;
use vpcore::net::{HttpClient, HttpRequest};
use vpcore::signaling::{AnswerPayload, CandidateMessage, OfferRequest, SessionToken, offer_url};

/// Posts offers and candidates to one agent's `/webrtc/offer` endpoint.
#[derive(Clone)]
pub struct SignalingClient {
    http: Arc<dyn HttpClient>,
    url: String,
    bearer: Option<String>,
}

impl SignalingClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: &str,
        agent_path: &str,
        bearer: Option<String>,
    ) -> Self {
        Self {
            http,
            url: offer_url(base_url, agent_path),
            bearer,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self) -> HttpRequest {
        let req = HttpRequest::post(&self.url);
        match &self.bearer {
            Some(token) => req.with_bearer(token),
            None => req,
        }
    }

    /// Sends the offer and returns the answer SDP.
    pub async fn send_offer(
        &self,
        sdp: &str,
        token: &SessionToken,
    ) -> Result<String, NegotiationError> {
        let body = OfferRequest::new(sdp, token.clone());
        let request = self
            .request()
            .with_json(&body)
            .map_err(|e| NegotiationError::SignalingRequestFailed(e.to_string()))?;

        debug!(target: "Session/Negotiate", "POST offer to {} ({} bytes of sdp)", self.url, sdp.len());
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| NegotiationError::SignalingRequestFailed(e.to_string()))?;

        if !response.is_success() {
            return Err(NegotiationError::SignalingRequestFailed(format!(
                "offer rejected with status {}: {}",
                response.status_code,
                response.error_detail()
            )));
        }

        let answer: AnswerPayload = response.parse_json().map_err(|e| {
            warn!(target: "Session/Negotiate", "Unparseable answer payload: {e}");
            NegotiationError::InvalidAnswer
        })?;
        answer
            .sdp()
            .map(str::to_string)
            .ok_or(NegotiationError::InvalidAnswer)
    }

    /// Posts one candidate flush. The response body is ignored.
    pub async fn send_candidates(
        &self,
        flush: CandidateFlush,
        token: &SessionToken,
    ) -> Result<(), anyhow::Error> {
        let message = match flush {
            CandidateFlush::Single(candidate) => CandidateMessage::Single {
                candidate,
                webrtc_id: token.clone(),
            },
            CandidateFlush::Batch(candidates) => CandidateMessage::Batch {
                candidates,
                webrtc_id: token.clone(),
            },
        };
        let response = self.http.execute(self.request().with_json(&message)?).await?;
        if !response.is_success() {
            anyhow::bail!(
                "candidate post rejected with status {}",
                response.status_code
            );
        }
        Ok(())
    }
}
