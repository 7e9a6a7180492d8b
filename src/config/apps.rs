//! App name to package resolution.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::actuator::{is_error_response, DeviceActuator};
use crate::session::DeviceSession;

/// Known display names and their Android packages.
///
/// Matching is case and whitespace insensitive, so only one spelling of each
/// name is listed.
pub const KNOWN_APPS: &[(&str, &str)] = &[
    // Social & Messaging
    ("微信", "com.tencent.mm"),
    ("QQ", "com.tencent.mobileqq"),
    ("微博", "com.sina.weibo"),
    // E-commerce
    ("淘宝", "com.taobao.taobao"),
    ("淘宝闪购", "com.taobao.taobao"),
    ("京东", "com.jingdong.app.mall"),
    ("京东秒送", "com.jingdong.app.mall"),
    ("拼多多", "com.xunmeng.pinduoduo"),
    // Lifestyle
    ("小红书", "com.xingin.xhs"),
    ("豆瓣", "com.douban.frodo"),
    ("知乎", "com.zhihu.android"),
    // Maps & Navigation
    ("高德地图", "com.autonavi.minimap"),
    ("百度地图", "com.baidu.BaiduMap"),
    ("Google Maps", "com.google.android.apps.maps"),
    ("Maps", "com.google.android.apps.maps"),
    // Food & Services
    ("美团", "com.sankuai.meituan"),
    ("大众点评", "com.dianping.v1"),
    ("饿了么", "me.ele"),
    ("肯德基", "com.yek.android.kfc.activitys"),
    // Travel
    ("携程", "ctrip.android.view"),
    ("铁路12306", "com.MobileTicket"),
    ("12306", "com.MobileTicket"),
    ("去哪儿", "com.Qunar"),
    ("去哪儿旅行", "com.Qunar"),
    ("滴滴出行", "com.sdu.did.psnger"),
    ("Booking", "com.booking"),
    ("Expedia", "com.expedia.bookings"),
    // Video & Entertainment
    ("bilibili", "tv.danmaku.bili"),
    ("抖音", "com.ss.android.ugc.aweme"),
    ("快手", "com.smile.gifmaker"),
    ("腾讯视频", "com.tencent.qqlive"),
    ("爱奇艺", "com.qiyi.video"),
    ("优酷视频", "com.youku.phone"),
    ("芒果TV", "com.hunantv.imgo.activity"),
    ("YouTube", "com.google.android.youtube"),
    // Music & Audio
    ("网易云音乐", "com.netease.cloudmusic"),
    ("QQ音乐", "com.tencent.qqmusic"),
    ("汽水音乐", "com.luna.music"),
    ("喜马拉雅", "com.ximalaya.ting.android"),
    // Reading
    ("番茄小说", "com.dragon.read"),
    ("七猫免费小说", "com.kmxs.reader"),
    // Productivity
    ("飞书", "com.ss.android.lark"),
    ("QQ邮箱", "com.tencent.androidqqmail"),
    ("Gmail", "com.google.android.gm"),
    ("Chrome", "com.android.chrome"),
    ("Google Chrome", "com.android.chrome"),
    ("豆包", "com.larus.nova"),
    // Health
    ("Keep", "com.gotokeep.keep"),
    ("美柚", "com.lingan.seeyou"),
    ("Duolingo", "com.duolingo"),
    // News
    ("腾讯新闻", "com.tencent.news"),
    ("今日头条", "com.ss.android.article.news"),
    // System
    ("Settings", "com.android.settings"),
    ("Android System Settings", "com.android.settings"),
    ("设置", "com.android.settings"),
    ("Files", "com.android.fileexplorer"),
    ("File Manager", "com.android.fileexplorer"),
    ("Camera", "com.android.camera"),
    ("相机", "com.android.camera"),
    ("Gallery", "com.android.gallery3d"),
    ("Calculator", "com.android.calculator2"),
    ("Calendar", "com.android.calendar"),
    ("Clock", "com.android.deskclock"),
    ("Contacts", "com.android.contacts"),
    ("Messages", "com.android.mms"),
    ("Phone", "com.android.dialer"),
    ("AudioRecorder", "com.android.soundrecorder"),
];

/// Lookup key: lowercase with whitespace, dashes and underscores removed.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

static NORMALIZED_APPS: Lazy<Vec<(String, &'static str)>> = Lazy::new(|| {
    KNOWN_APPS
        .iter()
        .map(|(name, package)| (normalize(name), *package))
        .collect()
});

/// Look up a display name in [`KNOWN_APPS`].
pub fn get_package(app_name: &str) -> Option<&'static str> {
    let key = normalize(app_name);
    if key.is_empty() {
        return None;
    }
    NORMALIZED_APPS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, package)| *package)
}

/// Display name of a package from the built-in table.
pub fn get_app_name(package: &str) -> Option<&'static str> {
    KNOWN_APPS
        .iter()
        .find(|(_, p)| *p == package)
        .map(|(name, _)| *name)
}

/// A launchable app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    pub name: String,
    pub package: String,
}

/// Turns human app names into package identifiers.
#[async_trait]
pub trait AppResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Option<String>;

    /// Every launchable app, sorted by name.
    async fn list_all(&self) -> Vec<AppEntry>;
}

const QUERY_LAUNCHABLE: &str =
    "cmd package query-activities --brief -a android.intent.action.MAIN -c android.intent.category.LAUNCHER";

/// Resolver over [`KNOWN_APPS`], optionally backed by the device's own
/// list of launchable activities.
#[derive(Clone, Default)]
pub struct PackageCatalog {
    actuator: Option<Arc<dyn DeviceActuator>>,
}

impl PackageCatalog {
    /// Catalogue without a device; only the static table is consulted.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(session: &DeviceSession) -> Self {
        Self {
            actuator: Some(session.actuator()),
        }
    }

    /// Packages with a launcher activity, or `None` if the device could not be asked.
    async fn launchable_packages(&self) -> Option<Vec<String>> {
        let actuator = self.actuator.as_ref()?;
        let output = actuator.execute_shell_command(QUERY_LAUNCHABLE).await;
        if is_error_response(&output) {
            tracing::warn!(output = %output, "could not query launchable activities");
            return None;
        }
        Some(parse_launchable(&output))
    }
}

/// Extract package names from `query-activities --brief` output.
pub fn parse_launchable(output: &str) -> Vec<String> {
    let mut packages: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.contains(char::is_whitespace))
        .filter_map(|line| line.split_once('/'))
        .map(|(package, _)| package.to_string())
        .filter(|package| package.contains('.'))
        .collect();
    packages.sort();
    packages.dedup();
    packages
}

#[async_trait]
impl AppResolver for PackageCatalog {
    async fn resolve(&self, name: &str) -> Option<String> {
        if let Some(package) = get_package(name) {
            return Some(package.to_string());
        }

        let key = normalize(name);
        if key.is_empty() {
            return None;
        }
        let packages = self.launchable_packages().await?;

        // Exact last segment first ("settings" -> com.android.settings), then containment.
        packages
            .iter()
            .find(|p| p.rsplit('.').next().map(|s| s.to_lowercase()) == Some(key.clone()))
            .or_else(|| packages.iter().find(|p| p.to_lowercase().contains(&key)))
            .cloned()
    }

    async fn list_all(&self) -> Vec<AppEntry> {
        let entries: BTreeMap<String, String> = match self.launchable_packages().await {
            Some(packages) => packages
                .into_iter()
                .map(|package| {
                    let name = get_app_name(&package)
                        .map(str::to_string)
                        .unwrap_or_else(|| package.clone());
                    (package, name)
                })
                .collect(),
            None => {
                let mut table = BTreeMap::new();
                for (name, package) in KNOWN_APPS {
                    table
                        .entry(package.to_string())
                        .or_insert_with(|| name.to_string());
                }
                table
            }
        };

        let mut apps: Vec<AppEntry> = entries
            .into_iter()
            .map(|(package, name)| AppEntry { name, package })
            .collect();
        apps.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        apps
    }
}
