//! Upstream URL layout.

use crate::config::ConfigProvider;
use chrono::NaiveDate;

pub const DEFAULT_USER_BASE: &str = "https://user.91160.com";
pub const DEFAULT_SITE_BASE: &str = "https://www.91160.com";

/// Base URLs of the account host and the booking site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteEndpoints {
    user_base: String,
    site_base: String,
}

impl Default for SiteEndpoints {
    fn default() -> Self {
        Self::new(DEFAULT_USER_BASE, DEFAULT_SITE_BASE)
    }
}

impl SiteEndpoints {
    pub fn new(user_base: &str, site_base: &str) -> Self {
        Self {
            user_base: user_base.trim_end_matches('/').to_string(),
            site_base: site_base.trim_end_matches('/').to_string(),
        }
    }

    /// Bases from `userBaseUrl` / `siteBaseUrl`, defaulting to the live site.
    pub fn from_config(config: &dyn ConfigProvider) -> Self {
        Self::new(
            &config.get("userBaseUrl", DEFAULT_USER_BASE),
            &config.get("siteBaseUrl", DEFAULT_SITE_BASE),
        )
    }

    /// The site's neutral landing page.
    pub fn home(&self) -> &str {
        &self.site_base
    }

    /// True if `url` is the landing page, ignoring a trailing slash.
    pub fn is_home(&self, url: &str) -> bool {
        url.trim().trim_end_matches('/') == self.site_base
    }

    pub fn login_page(&self) -> String {
        format!("{}/login.html", self.user_base)
    }

    pub fn check_user(&self) -> String {
        format!("{}/checkUser.html", self.user_base)
    }

    /// Page that only renders for a logged-in user.
    pub fn account_page(&self) -> String {
        format!("{}/order.html", self.user_base)
    }

    pub fn department_schedule(&self, unit_id: &str, dep_id: &str, date: NaiveDate) -> String {
        format!(
            "{}/dep/getschmast/uid-{unit_id}/depid-{dep_id}/date-{}/p-0.html",
            self.site_base,
            date.format("%Y-%m-%d")
        )
    }

    pub fn doctor_schedule(&self) -> String {
        format!("{}/doctors/ajaxgetclass.html", self.site_base)
    }

    pub fn booking_page(&self, unit_id: &str, dep_id: &str, schedule_id: &str) -> String {
        format!(
            "{}/guahao/ystep1/uid-{unit_id}/depid-{dep_id}/schid-{schedule_id}.html",
            self.site_base
        )
    }

    pub fn booking_submit(&self) -> String {
        format!("{}/guahao/ysubmit.html", self.site_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let site = SiteEndpoints::default();
        assert_eq!(site.login_page(), "https://user.91160.com/login.html");
        assert_eq!(
            site.department_schedule("21", "369", NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()),
            "https://www.91160.com/dep/getschmast/uid-21/depid-369/date-2024-03-04/p-0.html"
        );
        assert_eq!(
            site.booking_page("21", "369", "abc"),
            "https://www.91160.com/guahao/ystep1/uid-21/depid-369/schid-abc.html"
        );
    }

    #[test]
    fn test_is_home_ignores_trailing_slash() {
        let site = SiteEndpoints::new("http://127.0.0.1:1/", "http://127.0.0.1:2/");
        assert!(site.is_home("http://127.0.0.1:2"));
        assert!(site.is_home("http://127.0.0.1:2/"));
        assert!(!site.is_home("http://127.0.0.1:2/order/1.html"));
        assert_eq!(site.home(), "http://127.0.0.1:2");
    }
}
