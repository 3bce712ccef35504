//! HTTP client for the real NMS's northbound (NBAPI) and southbound (SBAPI)
//! REST surfaces. Every simulated node eventually calls through here: the
//! controller to create network/hub/AP/RT objects, the worker to register
//! APs/RTs and post heartbeats.
//!
//! Payload shapes follow the NMS's own request models (network/hub/AP/RT
//! create, secret/candidate registration, RT parameter registration); this
//! module only reflects them in idiomatic `serde` types, built on one shared
//! `reqwest::Client` the way a single pooled client is reused across calls.

use serde::{Deserialize, Serialize};

use crate::auth;
use crate::config::WorkerSettings;
use crate::error::ApiError;

/// Base London coordinates a hub's location is jittered around.
const BASE_LAT_DEG: f64 = 51.5072;
const BASE_LON_DEG: f64 = 0.1276;
/// Bound, in degrees, of the uniform jitter applied around the base
/// coordinates and not exposed as a configuration option.
const MAX_DIFF_DEG: f64 = 0.5;
/// An RT must land within this radius of its parent AP.
const RT_MAX_DISTANCE_KM: f64 = 20.0;
const KM_PER_DEGREE_LAT: f64 = 111.32;

pub fn zero_centred_rand(extent: f64) -> f64 {
    (rand::random::<f64>() * 2.0 * extent) - extent
}

/// Samples a fresh hub location scattered around the base coordinates.
/// Called once per hub, before the hub is posted to the NMS, so the
/// location can be stored in the tree and handed down to the hub's own
/// APs/RTs rather than regenerated (and lost) on every call.
pub fn random_hub_location() -> (f64, f64) {
    (
        BASE_LAT_DEG + zero_centred_rand(MAX_DIFF_DEG),
        BASE_LON_DEG + zero_centred_rand(MAX_DIFF_DEG),
    )
}

/// Samples a random point within `RT_MAX_DISTANCE_KM` of `(lat, lon)` using
/// the small-angle equirectangular approximation (good enough at this
/// scale; we are not simulating geodesy, just scattering RTs near their AP).
pub fn jitter_latlon_within_km(lat_deg: f64, lon_deg: f64, max_km: f64) -> (f64, f64) {
    let dy_km = zero_centred_rand(max_km);
    let dx_km = zero_centred_rand(max_km);
    let dlat = dy_km / KM_PER_DEGREE_LAT;
    let lat_rad = lat_deg.to_radians();
    let dlon = dx_km / (KM_PER_DEGREE_LAT * lat_rad.cos());
    (lat_deg + dlat, lon_deg + dlon)
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkCreatePayload {
    pub id: String,
    pub name: String,
    pub csi: String,
    pub email_domain: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkCreateResponse {
    pub csni: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubCreatePayload {
    pub id: String,
    pub name: String,
    pub csni: String,
    pub lat_deg: f64,
    pub lon_deg: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubCreateResponse {
    pub auid: String,
}

/// Mirrors the NMS's nested AP RF configuration block. Values beyond what
/// the simulator varies (modulation, beam profile) are fixed defaults; the
/// NMS only cares that the shape round-trips, not that the values are
/// realistic.
#[derive(Debug, Clone, Serialize)]
pub struct ApConfiguration {
    pub ap_du_beam_profile_id: u32,
    pub ap_du_dlmodulation: String,
    pub ap_du_ulmodulation: String,
    pub ap_du_bandwidth_mhz: u32,
    pub ap_du_centre_frequency_mhz: u32,
}

impl Default for ApConfiguration {
    fn default() -> Self {
        ApConfiguration {
            ap_du_beam_profile_id: 1,
            ap_du_dlmodulation: "QAM64".into(),
            ap_du_ulmodulation: "QAM16".into(),
            ap_du_bandwidth_mhz: 20,
            ap_du_centre_frequency_mhz: 3500,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApCreatePayload {
    pub allocated_auid: String,
    pub parent_auid: String,
    pub node_priority: String,
    pub ap_system_transmitter_enabled: bool,
    pub azimuth_deg: u32,
    pub elevation_deg: i32,
    pub height_mast_m: f64,
    pub height_asl_m: f64,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub configuration: ApConfiguration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApCreateResponse {
    pub auid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RtNetworkDetails {
    pub network_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RtCreatePayload {
    pub parent_auid: String,
    pub node_priority: String,
    pub height_mast_m: f64,
    pub height_asl_m: f64,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub network_details: RtNetworkDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RtCreateResponse {
    pub auid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterSecretPayload {
    pub auid: String,
    pub installer_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterCandidatePayload {
    pub auid: String,
    pub csi: String,
    pub installer_key: String,
}

#[derive(Debug, Clone, Serialize)]
struct RtRegisterParam {
    name: String,
    #[serde(rename = "type")]
    type_: String,
    value: String,
}

#[derive(Debug, Clone, Serialize)]
struct RtRegisterPayload {
    params: Vec<RtRegisterParam>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPayload {
    pub auid: String,
    pub timestamp: String,
}

/// Pooled HTTP client wrapping every NBAPI/SBAPI call the simulator needs.
/// One instance is shared by the controller; one instance (built from
/// [`WorkerSettings`]) is shared by every node inside a hub worker.
#[derive(Clone)]
pub struct NmsClient {
    http: reqwest::Client,
    nbapi_url: String,
    sbapi_url: String,
    secret_key: String,
    secret_key_rt: String,
    algorithm: String,
    token_expiry_seconds: i64,
    csi: String,
    installer_key: String,
}

impl NmsClient {
    pub fn new(settings: &WorkerSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.httpx_timeout)
            .danger_accept_invalid_certs(!settings.verify_ssl_cert)
            .pool_max_idle_per_host(settings.worker_httpx_poolsize)
            .build()?;
        Ok(NmsClient {
            http,
            nbapi_url: settings.nbapi_url.clone(),
            sbapi_url: settings.sbapi_url.clone(),
            secret_key: settings.secret_key.clone(),
            secret_key_rt: settings.secret_key_rt.clone(),
            algorithm: settings.algorithm.clone(),
            token_expiry_seconds: settings.token_expiry_seconds,
            csi: settings.csi.clone(),
            installer_key: settings.installer_key.clone(),
        })
    }

    fn admin_bearer(&self) -> anyhow::Result<String> {
        auth::admin_bearer(&self.secret_key, &self.algorithm, self.token_expiry_seconds)
    }

    fn rt_bearer(&self, auid: &str) -> anyhow::Result<String> {
        auth::rt_bearer(auid, &self.secret_key_rt, &self.algorithm, self.token_expiry_seconds)
    }

    /// `csi` is the operator-supplied customer ID this network is created
    /// under; it falls back to the client's configured default only at the
    /// caller's discretion, not here.
    pub async fn create_network(
        &self,
        auid: &str,
        email_domain: &str,
        csi: &str,
    ) -> Result<NetworkCreateResponse, ApiError> {
        let payload = NetworkCreatePayload {
            id: auid.to_string(),
            name: auid.to_string(),
            csi: csi.to_string(),
            email_domain: email_domain.to_string(),
        };
        self.post_nbapi(&format!("/api/v1/network/csi/{csi}"), &payload).await
    }

    pub async fn create_hub(
        &self,
        auid: &str,
        csni: &str,
        lat_deg: f64,
        lon_deg: f64,
    ) -> Result<HubCreateResponse, ApiError> {
        let payload = HubCreatePayload {
            id: auid.to_string(),
            name: auid.to_string(),
            csni: csni.to_string(),
            lat_deg,
            lon_deg,
        };
        self.post_nbapi(&format!("/api/v1/node/hub/{auid}"), &payload).await
    }

    /// Creates an AP as a child of `hub_auid`. The AP inherits the hub's
    /// lat/lon rather than sampling its own.
    pub async fn create_ap(
        &self,
        auid: &str,
        hub_auid: &str,
        hub_lat_deg: f64,
        hub_lon_deg: f64,
        azimuth_deg: u32,
    ) -> Result<ApCreateResponse, ApiError> {
        let payload = ApCreatePayload {
            allocated_auid: auid.to_string(),
            parent_auid: hub_auid.to_string(),
            node_priority: "Gold".into(),
            ap_system_transmitter_enabled: true,
            azimuth_deg,
            elevation_deg: 0,
            height_mast_m: 20.0,
            height_asl_m: 25.0,
            lat_deg: hub_lat_deg,
            lon_deg: hub_lon_deg,
            configuration: ApConfiguration::default(),
        };
        self.post_nbapi(&format!("/api/v1/node/ap/{auid}"), &payload).await
    }

    /// Creates an RT as a child of `ap_auid`, within 20km of the AP.
    /// `auid` is the temporary AUID already allocated for this RT by the
    /// controller, carried in the create path the same way AP creation
    /// carries its own pre-allocated AUID.
    pub async fn create_rt(
        &self,
        auid: &str,
        ap_auid: &str,
        ap_lat_deg: f64,
        ap_lon_deg: f64,
        network_id: &str,
    ) -> Result<RtCreateResponse, ApiError> {
        let (lat_deg, lon_deg) = jitter_latlon_within_km(ap_lat_deg, ap_lon_deg, RT_MAX_DISTANCE_KM);
        let payload = RtCreatePayload {
            parent_auid: ap_auid.to_string(),
            node_priority: "Gold".into(),
            height_mast_m: 1.5,
            height_asl_m: 5.0,
            lat_deg,
            lon_deg,
            network_details: RtNetworkDetails {
                network_id: network_id.to_string(),
            },
        };
        self.post_nbapi(&format!("/api/v1/node/rt/{auid}"), &payload).await
    }

    /// Southbound call: registers the AP's shared secret for candidate auth.
    /// `hub_auid` and `secret` travel as the `gnodebid`/`secret` headers the
    /// NMS expects alongside the JSON body.
    pub async fn register_ap_secret(&self, auid: &str, hub_auid: &str, secret: &str) -> Result<(), ApiError> {
        let payload = RegisterSecretPayload {
            auid: auid.to_string(),
            installer_key: self.installer_key.clone(),
        };
        self.post_sbapi_void_with_headers("/ap/register_secret/", &payload, hub_auid, secret)
            .await
    }

    /// Southbound call: registers the AP as a connected candidate device.
    pub async fn register_ap_candidate(&self, auid: &str, hub_auid: &str, secret: &str) -> Result<(), ApiError> {
        let payload = RegisterCandidatePayload {
            auid: auid.to_string(),
            csi: self.csi.clone(),
            installer_key: self.installer_key.clone(),
        };
        self.post_sbapi_void_with_headers("/ap/register_candidate", &payload, hub_auid, secret)
            .await
    }

    /// Southbound call: registers the RT, attaching its RF parameters.
    pub async fn register_rt(&self, auid: &str, ap_auid: &str) -> Result<(), ApiError> {
        let payload = RtRegisterPayload {
            params: vec![
                RtRegisterParam {
                    name: "parent_ap".into(),
                    type_: "string".into(),
                    value: ap_auid.to_string(),
                },
                RtRegisterParam {
                    name: "auid".into(),
                    type_: "string".into(),
                    value: auid.to_string(),
                },
            ],
        };
        self.post_sbapi_void(&format!("/api/v1/{auid}/rt-registration"), &payload).await
    }

    /// RT-scoped heartbeat call, authenticated with the RT secret rather
    /// than the admin credential.
    pub async fn heartbeat(&self, auid: &str, timestamp: &str) -> Result<(), ApiError> {
        let payload = HeartbeatPayload {
            auid: auid.to_string(),
            timestamp: timestamp.to_string(),
        };
        let url = format!("{}/api/v1/{}/heartbeat", self.sbapi_url, auid);
        let bearer = self
            .rt_bearer(auid)
            .map_err(|e| ApiError::UpstreamFailure(e.to_string()))?;
        let response = self
            .http
            .post(&url)
            .header("authorization", bearer)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::UpstreamFailure(format!(
                "heartbeat for {auid} failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn post_nbapi<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        self.post_admin(&format!("{}{}", self.nbapi_url, path), body).await
    }

    async fn post_sbapi_void<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let url = format!("{}{}", self.sbapi_url, path);
        let bearer = self
            .admin_bearer()
            .map_err(|e| ApiError::UpstreamFailure(e.to_string()))?;
        let response = self
            .http
            .post(&url)
            .header("authorization", bearer)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::UpstreamFailure(format!(
                "{path} failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Same as [`Self::post_sbapi_void`], with the `gnodebid`/`secret`
    /// headers the AP secret/candidate registration calls carry alongside
    /// the bearer token.
    async fn post_sbapi_void_with_headers<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        gnodebid: &str,
        secret: &str,
    ) -> Result<(), ApiError> {
        let url = format!("{}{}", self.sbapi_url, path);
        let bearer = self
            .admin_bearer()
            .map_err(|e| ApiError::UpstreamFailure(e.to_string()))?;
        let response = self
            .http
            .post(&url)
            .header("authorization", bearer)
            .header("gnodebid", gnodebid)
            .header("secret", secret)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::UpstreamFailure(format!(
                "{path} failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn post_admin<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let bearer = self
            .admin_bearer()
            .map_err(|e| ApiError::UpstreamFailure(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .header("authorization", bearer)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::UpstreamFailure(format!(
                "{url} failed: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::UpstreamFailure(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bound() {
        for _ in 0..200 {
            let (lat, lon) = jitter_latlon_within_km(51.5072, 0.1276, 20.0);
            let dlat_km = (lat - 51.5072).abs() * KM_PER_DEGREE_LAT;
            assert!(dlat_km <= 20.0 + 1e-6, "lat drift {dlat_km}km exceeds bound");
            assert!(lon.is_finite());
        }
    }

    #[test]
    fn zero_centred_rand_is_symmetric_around_zero() {
        for _ in 0..1000 {
            let v = zero_centred_rand(1.0);
            assert!((-1.0..=1.0).contains(&v));
        }
    }
}
