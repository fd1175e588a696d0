//! Rental status overlay injected into proxied HTML pages

use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use serde::Serialize;

use crate::models::TenantRecord;

const BAR_ID: &str = "__rental_bar";

/// The expiry modal is shown when this many days or fewer remain
pub const MODAL_DAYS: i64 = 3;

#[allow(clippy::expect_used)]
static BODY_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<body\b[^>]*>").expect("constant regex pattern is valid"));

/// Everything the overlay needs to know about the current page view
#[derive(Debug, Clone)]
pub struct OverlayContext<'a> {
    pub tenant_id: &'a str,
    pub record: &'a TenantRecord,
    pub now: DateTime<Utc>,
    pub offset: FixedOffset,
    /// Proxy entry prefix (`/proxy?u=<id>&url=`)
    pub proxy_entry: &'a str,
    /// Proxied URL of the tenant's post listing
    pub posts_url: Option<String>,
    pub support_url: Option<&'a str>,
}

/// Data handed to the client script as `window.__RENTAL__`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalData {
    pub tenant_id: String,
    pub display_name: String,
    /// Epoch ms of the last second of the rental
    pub rental_end: Option<i64>,
    /// Base64 of `email:password`
    pub credentials: Option<String>,
    pub proxy_entry: String,
    pub posts_url: Option<String>,
}

impl OverlayContext<'_> {
    pub fn rental_data(&self) -> RentalData {
        RentalData {
            tenant_id: self.tenant_id.to_string(),
            display_name: self.record.display_name(self.tenant_id).to_string(),
            rental_end: self
                .record
                .rental_end_at(self.offset)
                .map(|end| end.timestamp_millis()),
            credentials: self.record.site_credentials.as_ref().map(|c| {
                BASE64.encode(format!("{}:{}", c.email, c.password).as_bytes())
            }),
            proxy_entry: self.proxy_entry.to_string(),
            posts_url: self.posts_url.clone(),
        }
    }

    fn days_left(&self) -> Option<i64> {
        self.record.days_remaining(self.now, self.offset)
    }
}

/// Insert the overlay right after the `<body>` open tag, or in front of the document
pub fn inject(html: &str, ctx: &OverlayContext<'_>) -> String {
    if html.contains(BAR_ID) {
        return html.to_string();
    }

    let overlay = render(ctx);
    match BODY_OPEN.find(html) {
        Some(open) => {
            let mut out = String::with_capacity(html.len() + overlay.len());
            out.push_str(&html[..open.end()]);
            out.push_str(&overlay);
            out.push_str(&html[open.end()..]);
            out
        }
        None => format!("{}{}", overlay, html),
    }
}

/// Overlay markup: data contract, status bar, floating buttons and expiry modal
pub fn render(ctx: &OverlayContext<'_>) -> String {
    let data = ctx.rental_data();
    let days_left = ctx.days_left();
    let robot_on = ctx.record.robot_on != Some(false);

    let mut out = String::new();
    out.push_str(&data_script(&data));
    out.push_str(STYLE);

    out.push_str(&format!(
        r#"<div id="{id}"><span class="rb-name">{name}</span><span class="rb-days">{days}</span><span class="rb-robot"><i class="rb-dot {dot}"></i>Robot</span><span class="rb-slot" data-rental-slot></span></div>"#,
        id = BAR_ID,
        name = escape_html(&data.display_name),
        days = escape_html(&remaining_label(days_left)),
        dot = if robot_on { "on" } else { "off" },
    ));

    out.push_str(r#"<div class="rb-fabs"><button type="button" class="rb-fab" data-rental-robot>&#129302;</button>"#);
    if let Some(support) = ctx.support_url {
        out.push_str(&format!(
            r#"<a class="rb-fab" target="_blank" rel="noopener" href="{}">?</a>"#,
            escape_html(support)
        ));
    }
    out.push_str("</div>");

    if let Some(days) = days_left.filter(|d| (0..=MODAL_DAYS).contains(d)) {
        out.push_str(&format!(
            r#"<div class="rb-modal" data-rental-modal><div class="rb-card"><p>{}</p><button type="button" data-rental-close>OK</button></div></div>"#,
            expiry_message(days)
        ));
    }

    out.push_str(CLIENT_SCRIPT);
    out
}

/// Status bar text for the remaining rental time
fn remaining_label(days_left: Option<i64>) -> String {
    match days_left {
        None => "Renta activa".to_string(),
        Some(d) if d < 0 => "Renta vencida".to_string(),
        Some(0) => "Vence HOY".to_string(),
        Some(1) => "1 día restante".to_string(),
        Some(d) => format!("{} días restantes", d),
    }
}

fn expiry_message(days: i64) -> String {
    match days {
        0 => "Tu renta vence HOY".to_string(),
        1 => "Tu renta vence en 1 día".to_string(),
        d => format!("Tu renta vence en {} días", d),
    }
}

fn data_script(data: &RentalData) -> String {
    let json = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
    format!(
        "<script>window.__RENTAL__={};</script>",
        json.replace("</", "<\\/")
    )
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = "<style>\
#__rental_bar{position:fixed;top:0;left:0;right:0;z-index:2147483646;display:flex;gap:12px;align-items:center;padding:4px 12px;font:13px/1.4 sans-serif;background:#1f2937;color:#f9fafb}\
#__rental_bar .rb-name{font-weight:bold}\
#__rental_bar .rb-dot{display:inline-block;width:8px;height:8px;margin-right:4px;border-radius:50%;background:#9ca3af}\
#__rental_bar .rb-dot.on{background:#22c55e}\
#__rental_bar .rb-slot{margin-left:auto}\
.rb-fabs{position:fixed;right:16px;bottom:16px;z-index:2147483646;display:flex;flex-direction:column;gap:8px}\
.rb-fab{width:44px;height:44px;border:0;border-radius:50%;background:#1f2937;color:#fff;font-size:20px;text-align:center;line-height:44px;text-decoration:none;cursor:pointer}\
.rb-modal{position:fixed;inset:0;z-index:2147483647;display:flex;align-items:center;justify-content:center;background:rgba(0,0,0,.6)}\
.rb-card{padding:24px;border-radius:8px;background:#fff;color:#111;font:16px sans-serif;text-align:center}\
body{padding-top:28px!important}\
</style>";

/// Countdown, bump counter and robot toggle; all state after first paint is local
const CLIENT_SCRIPT: &str = r#"<script>(function(){
var R=window.__RENTAL__||{},K="__rental_"+R.tenantId+"_";
var bar=document.getElementById("__rental_bar");if(!bar)return;
var slot=bar.querySelector("[data-rental-slot]"),dot=bar.querySelector(".rb-dot");
function get(k,d){try{var v=localStorage.getItem(K+k);return v===null?d:JSON.parse(v);}catch(e){return d;}}
function set(k,v){try{localStorage.setItem(K+k,JSON.stringify(v));}catch(e){}}
function pad(n){return n<10?"0"+n:""+n;}
function tick(){var parts=[];if(R.rentalEnd){var s=Math.max(0,Math.floor((R.rentalEnd-Date.now())/1000));parts.push(Math.floor(s/86400)+"d "+pad(Math.floor(s/3600)%24)+":"+pad(Math.floor(s/60)%60)+":"+pad(s%60));}
parts.push("Bumps: "+get("bumps",0));if(slot)slot.textContent=parts.join(" | ");
if(dot)dot.className="rb-dot "+(get("robot",dot.className.indexOf("on")!==-1)?"on":"off");}
var toggle=document.querySelector("[data-rental-robot]");
if(toggle)toggle.addEventListener("click",function(){set("robot",!get("robot",dot&&dot.className.indexOf("on")!==-1));tick();});
var modal=document.querySelector("[data-rental-modal]");
if(modal){var day=new Date().toDateString();if(get("modal",null)===day){modal.remove();}else{var close=modal.querySelector("[data-rental-close]");if(close)close.addEventListener("click",function(){set("modal",day);modal.remove();});}}
tick();setInterval(tick,1000);
})();</script>"#;
