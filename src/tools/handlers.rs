use futures_util::FutureExt;
use serde_json::{json, Value};

use super::validator::{
    validate_boolean, validate_camera_id, validate_device_id, validate_door_id, validate_duration,
    validate_mac, validate_site_id, validate_wlan_id,
};
use super::{ToolFuture, ToolHandler};
use crate::gateway::{Dispatcher, GatewayError, GatewayRequest, GatewayResponse, ValidationError};

const INTEGRATION_BASE: &str = "/proxy/network/integrations/v1";
const LEGACY_BASE: &str = "/proxy/network/api";
const ACCESS_BASE: &str = "/proxy/access/api/v1";
const PROTECT_BASE: &str = "/proxy/protect/api";

const PAGE_SIZE: u64 = 200;
const MAX_PAGES: usize = 50;

pub const DEFAULT_TOOLS: &[(&str, &str, ToolHandler)] = &[
    ("unifi_health", "Ping the Integration API and report basic health", unifi_health),
    ("list_sites", "List sites known to the controller", list_sites),
    ("list_devices", "List adopted devices of a site", list_devices),
    ("list_clients", "List clients of a site, optionally only active ones", list_clients),
    ("block_client", "Block a client from the network by MAC address", block_client),
    ("unblock_client", "Unblock a previously blocked client", unblock_client),
    ("kick_client", "Disconnect a client so it reconnects", kick_client),
    ("locate_device", "Flash a device's locate LED for a number of seconds", locate_device),
    ("wlan_set_enabled", "Enable or disable a WLAN through the legacy API", wlan_set_enabled),
    ("access_unlock_door", "Unlock an Access door for a number of seconds", access_unlock_door),
    ("protect_list_cameras", "List Protect cameras", protect_list_cameras),
    ("protect_camera_reboot", "Reboot a Protect camera", protect_camera_reboot),
    ("protect_camera_led", "Turn a Protect camera's status LED on or off", protect_camera_led),
    ("protect_toggle_privacy", "Turn a Protect camera's privacy mode on or off", protect_toggle_privacy),
];

// `null` counts as absent.
fn param<'a>(params: &'a Value, name: &str) -> Option<&'a Value> {
    params.get(name).filter(|v| !v.is_null())
}

fn required<'a>(params: &'a Value, name: &str) -> Result<&'a Value, ValidationError> {
    param(params, name).ok_or_else(|| ValidationError::new(name, "is required"))
}

fn required_str<'a>(params: &'a Value, name: &str) -> Result<&'a str, ValidationError> {
    required(params, name)?
        .as_str()
        .ok_or_else(|| ValidationError::new(name, "must be a string"))
}

fn site(params: &Value) -> Result<String, ValidationError> {
    validate_site_id(required_str(params, "site_id")?)
}

fn envelope(resp: GatewayResponse) -> Value {
    json!({
        "success": true,
        "status": resp.status,
        "auth": resp.auth_scheme,
        "data": resp.body,
    })
}

/// Walks Integration API pages until the controller reports the last one.
async fn paginate(
    dispatcher: &Dispatcher,
    path: &str,
    endpoint_key: &str,
) -> Result<Value, GatewayError> {
    let mut items: Vec<Value> = Vec::new();
    let mut offset = 0u64;
    let mut last = None;
    for _ in 0..MAX_PAGES {
        let resp = dispatcher
            .execute(
                GatewayRequest::get(path, endpoint_key)
                    .with_query("limit", PAGE_SIZE.to_string())
                    .with_query("offset", offset.to_string()),
            )
            .await?;
        let page = resp.body.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
        let count = resp.body.get("count").and_then(Value::as_u64).unwrap_or(page.len() as u64);
        let limit = resp.body.get("limit").and_then(Value::as_u64).unwrap_or(0);
        let total = resp.body.get("totalCount").and_then(Value::as_u64).unwrap_or(0);
        items.extend(page);
        last = Some(resp);
        if count == 0 || count != limit || total <= items.len() as u64 {
            break;
        }
        offset += limit;
    }
    let count = items.len();
    let mut out = match last {
        Some(resp) => envelope(GatewayResponse {
            body: Value::Array(items),
            ..resp
        }),
        None => json!({"success": true, "data": []}),
    };
    out["count"] = json!(count);
    Ok(out)
}

fn unifi_health<'a>(d: &'a Dispatcher, _params: &'a Value) -> ToolFuture<'a> {
    async move {
        let path = format!("{INTEGRATION_BASE}/sites");
        // Health reports failures in-band instead of erroring.
        Ok(match d.execute(GatewayRequest::get(path, "network/sites")).await {
            Ok(resp) => json!({
                "ok": true,
                "integration_sites_count": resp.body.get("count"),
                "auth": resp.auth_scheme,
                "base": INTEGRATION_BASE,
            }),
            Err(err) => json!({
                "ok": false,
                "error": err.code(),
                "message": err.to_string(),
                "base": INTEGRATION_BASE,
            }),
        })
    }
    .boxed()
}

fn list_sites<'a>(d: &'a Dispatcher, _params: &'a Value) -> ToolFuture<'a> {
    async move { paginate(d, &format!("{INTEGRATION_BASE}/sites"), "network/sites").await }.boxed()
}

fn list_devices<'a>(d: &'a Dispatcher, params: &'a Value) -> ToolFuture<'a> {
    async move {
        let site = site(params)?;
        paginate(d, &format!("{INTEGRATION_BASE}/sites/{site}/devices"), "network/devices").await
    }
    .boxed()
}

fn list_clients<'a>(d: &'a Dispatcher, params: &'a Value) -> ToolFuture<'a> {
    async move {
        let site = site(params)?;
        let active = match param(params, "active") {
            Some(v) => validate_boolean(v, "active")?,
            None => false,
        };
        let path = if active {
            format!("{INTEGRATION_BASE}/sites/{site}/clients/active")
        } else {
            format!("{INTEGRATION_BASE}/sites/{site}/clients")
        };
        paginate(d, &path, "network/clients").await
    }
    .boxed()
}

async fn client_action(d: &Dispatcher, params: &Value, action: &str) -> Result<Value, GatewayError> {
    let site = site(params)?;
    let mac = validate_mac(required_str(params, "mac")?)?;
    let request = GatewayRequest::post(
        format!("{INTEGRATION_BASE}/sites/{site}/clients/{action}"),
        format!("network/clients/{action}"),
    )
    .with_body(json!({ "mac": mac }));
    Ok(envelope(d.execute(request).await?))
}

fn block_client<'a>(d: &'a Dispatcher, params: &'a Value) -> ToolFuture<'a> {
    client_action(d, params, "block").boxed()
}

fn unblock_client<'a>(d: &'a Dispatcher, params: &'a Value) -> ToolFuture<'a> {
    client_action(d, params, "unblock").boxed()
}

fn kick_client<'a>(d: &'a Dispatcher, params: &'a Value) -> ToolFuture<'a> {
    client_action(d, params, "kick").boxed()
}

fn locate_device<'a>(d: &'a Dispatcher, params: &'a Value) -> ToolFuture<'a> {
    async move {
        let site = site(params)?;
        let device = validate_device_id(required_str(params, "device_id")?)?;
        let seconds = match param(params, "seconds") {
            Some(v) => validate_duration(v, 5, 300)?,
            None => 30,
        };
        let request = GatewayRequest::post(
            format!("{INTEGRATION_BASE}/sites/{site}/devices/{device}/locate"),
            "network/devices/locate",
        )
        .with_body(json!({ "duration": seconds }));
        Ok(envelope(d.execute(request).await?))
    }
    .boxed()
}

fn wlan_set_enabled<'a>(d: &'a Dispatcher, params: &'a Value) -> ToolFuture<'a> {
    async move {
        let site = site(params)?;
        let wlan = validate_wlan_id(required_str(params, "wlan_id")?)?;
        let enabled = validate_boolean(required(params, "enabled")?, "enabled")?;
        let request = GatewayRequest::post(
            format!("{LEGACY_BASE}/s/{site}/rest/wlanconf/{wlan}"),
            "legacy/wlanconf",
        )
        .with_body(json!({ "_id": wlan, "enabled": enabled }));
        Ok(envelope(d.execute(request).await?))
    }
    .boxed()
}

fn access_unlock_door<'a>(d: &'a Dispatcher, params: &'a Value) -> ToolFuture<'a> {
    async move {
        let door = validate_door_id(required_str(params, "door_id")?)?;
        let seconds = match param(params, "seconds") {
            Some(v) => validate_duration(v, 1, 60)?,
            None => 5,
        };
        let request = GatewayRequest::post(
            format!("{ACCESS_BASE}/doors/{door}/unlock"),
            "access/doors/unlock",
        )
        .with_body(json!({ "duration": seconds }));
        Ok(envelope(d.execute(request).await?))
    }
    .boxed()
}

fn protect_list_cameras<'a>(d: &'a Dispatcher, _params: &'a Value) -> ToolFuture<'a> {
    async move {
        let resp = d
            .execute(GatewayRequest::get(format!("{PROTECT_BASE}/cameras"), "protect/cameras"))
            .await?;
        Ok(envelope(resp))
    }
    .boxed()
}

fn protect_camera_reboot<'a>(d: &'a Dispatcher, params: &'a Value) -> ToolFuture<'a> {
    async move {
        let camera = validate_camera_id(required_str(params, "camera_id")?)?;
        let request = GatewayRequest::post(
            format!("{PROTECT_BASE}/cameras/{camera}/reboot"),
            "protect/cameras/reboot",
        );
        Ok(envelope(d.execute(request).await?))
    }
    .boxed()
}

async fn camera_update(d: &Dispatcher, params: &Value, patch: fn(bool) -> Value) -> Result<Value, GatewayError> {
    let camera = validate_camera_id(required_str(params, "camera_id")?)?;
    let enabled = validate_boolean(required(params, "enabled")?, "enabled")?;
    let request = GatewayRequest::post(
        format!("{PROTECT_BASE}/cameras/{camera}"),
        "protect/cameras/update",
    )
    .with_body(patch(enabled));
    Ok(envelope(d.execute(request).await?))
}

fn protect_camera_led<'a>(d: &'a Dispatcher, params: &'a Value) -> ToolFuture<'a> {
    camera_update(d, params, |enabled| json!({ "ledSettings": { "isEnabled": enabled } })).boxed()
}

fn protect_toggle_privacy<'a>(d: &'a Dispatcher, params: &'a Value) -> ToolFuture<'a> {
    camera_update(d, params, |enabled| json!({ "privacyMode": enabled })).boxed()
}
