//! DingTalk robot OpenAPI: group messages (text / markdown) and streaming AI cards.

use crate::channels::inbound::ConversationType;
use crate::channels::outbound::{CardTarget, CardUpdate, ConversationOutbound, DeliveryError};
use crate::channels::token::DINGTALK_API_BASE;
use crate::config::DingTalkConfig;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

const ACCESS_TOKEN_HEADER: &str = "x-acs-dingtalk-access-token";
const MSG_KEY_TEXT: &str = "sampleText";
const MSG_KEY_MARKDOWN: &str = "sampleMarkdown";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupSendRequest<'a> {
    msg_key: &'a str,
    /// JSON-encoded message parameters.
    msg_param: String,
    open_conversation_id: &'a str,
    robot_code: &'a str,
}

/// DingTalk delivery client. Cloning shares the underlying HTTP client.
#[derive(Clone)]
pub struct DingTalkClient {
    base_url: String,
    robot_code: String,
    client: reqwest::Client,
}

impl DingTalkClient {
    pub fn new(client: reqwest::Client, base_url: Option<String>, robot_code: impl Into<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DINGTALK_API_BASE.to_string());
        Self {
            base_url,
            robot_code: robot_code.into(),
            client,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &DingTalkConfig) -> Self {
        Self::new(
            client,
            config.api_base.clone(),
            config.robot_code.clone().unwrap_or_default(),
        )
    }

    /// POST /v1.0/robot/groupMessages/send
    async fn group_send(
        &self,
        token: &str,
        conversation_id: &str,
        msg_key: &str,
        msg_param: serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let url = format!("{}/v1.0/robot/groupMessages/send", self.base_url);
        let body = GroupSendRequest {
            msg_key,
            msg_param: msg_param.to_string(),
            open_conversation_id: conversation_id,
            robot_code: &self.robot_code,
        };
        let res = self
            .client
            .post(&url)
            .header(ACCESS_TOKEN_HEADER, token)
            .json(&body)
            .send()
            .await?;
        let res = check_status(res).await?;
        let body = res.text().await.unwrap_or_default();
        log::debug!("group send response: {}", body);
        Ok(())
    }

    fn open_space(&self, target: &CardTarget) -> serde_json::Value {
        match target.conversation_type {
            ConversationType::Group => json!({
                "openSpaceId": format!("dtv1.card//IM_GROUP.{}", target.conversation_id),
                "imGroupOpenSpaceModel": { "supportForward": true },
                "imGroupOpenDeliverModel": { "robotCode": self.robot_code },
            }),
            ConversationType::OneToOne => json!({
                "openSpaceId": format!(
                    "dtv1.card//IM_ROBOT.{}",
                    target.sender_id.as_deref().unwrap_or_default()
                ),
                "imRobotOpenSpaceModel": { "supportForward": true },
                "imRobotOpenDeliverModel": { "spaceType": "IM_ROBOT" },
            }),
        }
    }
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, DeliveryError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(DeliveryError::Api(format!("{} {}", status, body)))
}

#[async_trait]
impl ConversationOutbound for DingTalkClient {
    async fn send_text(
        &self,
        token: &str,
        conversation_id: &str,
        text: &str,
    ) -> Result<(), DeliveryError> {
        let param = json!({ "content": text });
        match self.group_send(token, conversation_id, MSG_KEY_TEXT, param).await {
            Ok(()) => {
                log::info!("text message sent to {}", conversation_id);
                Ok(())
            }
            Err(e) => {
                log::error!("sending text message to {} failed: {}", conversation_id, e);
                Err(e)
            }
        }
    }

    async fn send_markdown(
        &self,
        token: &str,
        conversation_id: &str,
        title: &str,
        content: &str,
    ) -> Result<(), DeliveryError> {
        let param = json!({ "title": title, "text": content });
        match self.group_send(token, conversation_id, MSG_KEY_MARKDOWN, param).await {
            Ok(()) => {
                log::info!("markdown message sent to {}", conversation_id);
                Ok(())
            }
            Err(e) => {
                log::error!("sending markdown message to {} failed: {}", conversation_id, e);
                Err(e)
            }
        }
    }

    /// POST /v1.0/card/instances/createAndDeliver with a generated outTrackId, which is the instance id.
    async fn create_card(
        &self,
        token: &str,
        target: &CardTarget,
        template_id: &str,
        initial: &BTreeMap<String, String>,
    ) -> Result<String, DeliveryError> {
        let url = format!("{}/v1.0/card/instances/createAndDeliver", self.base_url);
        let out_track_id = uuid::Uuid::new_v4().to_string();
        let mut body = json!({
            "cardTemplateId": template_id,
            "outTrackId": out_track_id,
            "callbackType": "STREAM",
            "cardData": { "cardParamMap": initial },
        });
        if let (Some(obj), serde_json::Value::Object(space)) = (body.as_object_mut(), self.open_space(target)) {
            obj.extend(space);
        }
        let res = self
            .client
            .post(&url)
            .header(ACCESS_TOKEN_HEADER, token)
            .json(&body)
            .send()
            .await?;
        if let Err(e) = check_status(res).await {
            log::error!("creating card in {} failed: {}", target.conversation_id, e);
            return Err(e);
        }
        log::debug!("card {} delivered to {}", out_track_id, target.conversation_id);
        Ok(out_track_id)
    }

    /// PUT /v1.0/card/streaming with `isFull: true`, so each update replaces the content.
    async fn update_card(&self, token: &str, update: CardUpdate<'_>) -> Result<(), DeliveryError> {
        let url = format!("{}/v1.0/card/streaming", self.base_url);
        let body = json!({
            "outTrackId": update.card_instance_id,
            "guid": uuid::Uuid::new_v4().to_string(),
            "key": update.content_key,
            "content": update.content,
            "isFull": true,
            "isFinalize": update.finished,
            "isError": update.failed,
        });
        let res = self
            .client
            .put(&url)
            .header(ACCESS_TOKEN_HEADER, token)
            .json(&body)
            .send()
            .await?;
        if let Err(e) = check_status(res).await {
            log::error!("updating card {} failed: {}", update.card_instance_id, e);
            return Err(e);
        }
        Ok(())
    }
}
