//! Claiming a slot.
//!
//! The slot's booking page carries hidden fields the claim must echo back.
//! The claim itself answers with a redirect: anywhere but the site's home
//! page means the slot is ours, home means someone else got there first.

use crate::acquisition::http_client::{HttpGateway, Redirects};
use crate::acquisition::markup::first_attr;
use crate::acquisition::site::SiteEndpoints;
use crate::acquisition::slot::Slot;
use crate::error::AcquireError;
use async_trait::async_trait;
use scraper::Html;
use std::sync::Arc;

/// Address id and label the booking form submits for mainland accounts.
const ADDRESS_ID: &str = "3317";
const ADDRESS: &str = "China";

/// Result of a claim that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The claim was accepted; carries the confirmation redirect.
    Won { confirmation: String },
    /// A competitor took the slot first.
    Lost,
}

impl ClaimOutcome {
    pub fn is_won(&self) -> bool {
        matches!(self, ClaimOutcome::Won { .. })
    }
}

/// Hidden fields scraped from a booking page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingForm {
    pub sch_data: String,
    pub member_id: String,
    pub detail_id: String,
    pub detail_id_realtime: String,
}

impl BookingForm {
    /// Scrape the four required fields; `None` if any is missing.
    pub fn parse(html: &str) -> Option<Self> {
        let document = Html::parse_document(html);
        Some(Self {
            sch_data: first_attr(&document, "[name=sch_data]", "value")?,
            member_id: first_attr(&document, "[name=mid]", "value")?,
            detail_id: first_attr(&document, "#delts li", "val")?,
            detail_id_realtime: first_attr(&document, "input#detlid_realtime", "value")?,
        })
    }

    /// The claim payload for `slot`.
    pub fn claim_fields(&self, slot: &Slot) -> Vec<(&'static str, String)> {
        vec![
            ("sch_data", self.sch_data.clone()),
            ("mid", self.member_id.clone()),
            ("hisMemId", String::new()),
            ("disease_input", String::new()),
            ("order_no", String::new()),
            ("disease_content", String::new()),
            ("accept", "1".to_string()),
            ("unit_id", slot.unit_id.clone()),
            ("schedule_id", slot.schedule_id.clone()),
            ("dep_id", slot.dep_id.clone()),
            ("his_dep_id", String::new()),
            ("sch_date", String::new()),
            ("time_type", slot.time_type.clone()),
            ("doctor_id", slot.doctor_id.clone()),
            ("his_doc_id", String::new()),
            ("detlid", self.detail_id.clone()),
            ("detlid_realtime", self.detail_id_realtime.clone()),
            ("level_code", slot.level_code.clone()),
            ("is_hot", String::new()),
            ("addressId", ADDRESS_ID.to_string()),
            ("address", ADDRESS.to_string()),
            ("buyinsurance", "1".to_string()),
        ]
    }
}

/// Anything that can attempt to claim a slot.
#[async_trait]
pub trait SlotClaimer: Send {
    async fn claim(&mut self, slot: &Slot) -> Result<ClaimOutcome, AcquireError>;
}

pub struct BookingSubmitter {
    gateway: Arc<HttpGateway>,
    site: SiteEndpoints,
}

impl BookingSubmitter {
    pub fn new(gateway: Arc<HttpGateway>, site: SiteEndpoints) -> Self {
        Self { gateway, site }
    }

    /// Scrape the booking page for `slot` and submit the claim.
    pub async fn submit(&self, slot: &Slot) -> Result<ClaimOutcome, AcquireError> {
        let page_url = self
            .site
            .booking_page(&slot.unit_id, &slot.dep_id, &slot.schedule_id);
        let page = self.gateway.get(&page_url, Redirects::Follow).await?;
        let form = BookingForm::parse(&page.body).ok_or_else(|| {
            AcquireError::protocol(
                &page_url,
                format!("necessary booking parameters absent: {}", page.body),
            )
        })?;

        let submit_url = self.site.booking_submit();
        let resp = self
            .gateway
            .post_form(&submit_url, &form.claim_fields(slot), Redirects::Manual)
            .await?;

        let Some(target) = resp.redirect_target() else {
            return Err(AcquireError::protocol(
                &submit_url,
                format!("claim answered {} without redirect: {}", resp.status, resp.body),
            ));
        };
        tracing::info!("claim redirected to {target}");

        if self.site.is_home(&target) {
            Ok(ClaimOutcome::Lost)
        } else {
            Ok(ClaimOutcome::Won {
                confirmation: target,
            })
        }
    }
}

#[async_trait]
impl SlotClaimer for BookingSubmitter {
    async fn claim(&mut self, slot: &Slot) -> Result<ClaimOutcome, AcquireError> {
        self.submit(slot).await
    }
}
