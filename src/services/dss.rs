//! Discovery and Synchronization service façade.
//!
//! Translates wire requests into store operations: authorizes the caller,
//! decodes 4-D extents into domain values, and renders results plus the
//! notification list back to the wire. All registry semantics live in the
//! store; this layer owns only the boundary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use s2::cellid::CellID;
use tonic::{Request, Response, Status};
use tracing::{error, info};
use uuid::Uuid;

use crate::auth;
use crate::geo::{self, Winding};
use crate::models::{
    IdentificationServiceArea, IsaPatch, Subscription, SubscriptionPatch,
};
use crate::proto::discovery_and_synchronization_service_server::DiscoveryAndSynchronizationService;
use crate::proto::{
    DeleteIdentificationServiceAreaRequest, DeleteIdentificationServiceAreaResponse,
    DeleteSubscriptionRequest, DeleteSubscriptionResponse, GetIdentificationServiceAreaRequest,
    GetIdentificationServiceAreaResponse, GetSubscriptionRequest, GetSubscriptionResponse,
    PatchIdentificationServiceAreaRequest, PatchIdentificationServiceAreaResponse,
    PatchSubscriptionRequest, PatchSubscriptionResponse, PutIdentificationServiceAreaRequest,
    PutIdentificationServiceAreaResponse, PutSubscriptionRequest, PutSubscriptionResponse,
    SearchIdentificationServiceAreasRequest, SearchIdentificationServiceAreasResponse,
    SearchSubscriptionsRequest, SearchSubscriptionsResponse, SubscriberToNotify,
    SubscriptionCallbacks, SubscriptionState, Volume4D,
};
use crate::store::{Store, StoreError};

/// The DSS RPC service.
pub struct DssService {
    store: Arc<dyn Store>,
    winding: Winding,
}

impl DssService {
    /// Create a new service over `store`, parsing polygons with `winding`.
    pub fn new(store: Arc<dyn Store>, winding: Winding) -> Self {
        Self { store, winding }
    }
}

fn parse_id(id: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(id).map_err(|e| Status::invalid_argument(format!("invalid id {id:?}: {e}")))
}

fn decode_time(ts: &prost_types::Timestamp) -> Result<DateTime<Utc>, Status> {
    DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32)
        .ok_or_else(|| Status::invalid_argument(format!("invalid timestamp {ts:?}")))
}

fn encode_time(t: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: t.timestamp(),
        nanos: t.timestamp_subsec_nanos() as i32,
    }
}

fn decode_cells(area: &str, winding: Winding) -> Result<Vec<CellID>, Status> {
    geo::area_to_cells(area, winding).map_err(|e| Status::invalid_argument(e.to_string()))
}

fn store_status(err: StoreError) -> Status {
    match err {
        StoreError::NotFound(id) => Status::not_found(format!("no entity with id {id}")),
        StoreError::VersionMismatch(id) => {
            Status::failed_precondition(format!("version mismatch for {id}"))
        }
        StoreError::PermissionDenied { id, owner } => {
            Status::permission_denied(format!("{owner} does not own {id}"))
        }
        StoreError::InvalidInput(msg) => Status::invalid_argument(msg),
        StoreError::Validation(e) => Status::invalid_argument(e.to_string()),
        StoreError::Database(e) => {
            error!(error = %e, "store failure");
            Status::internal("store failure")
        }
    }
}

fn isa_to_proto(isa: &IdentificationServiceArea) -> crate::proto::IdentificationServiceArea {
    crate::proto::IdentificationServiceArea {
        id: isa.id.to_string(),
        owner: isa.owner.clone(),
        flights_url: isa.url.clone(),
        extents: Some(Volume4D {
            area: String::new(),
            altitude_lo: isa.altitude_lo,
            altitude_hi: isa.altitude_hi,
            time_start: Some(encode_time(isa.starts_at)),
            time_end: Some(encode_time(isa.ends_at)),
        }),
        version: isa.version(),
    }
}

fn subscription_to_proto(sub: &Subscription) -> crate::proto::Subscription {
    crate::proto::Subscription {
        id: sub.id.to_string(),
        owner: sub.owner.clone(),
        callbacks: Some(SubscriptionCallbacks {
            identification_service_area_url: sub.url.clone(),
        }),
        notification_index: sub.notification_index,
        begins: sub.begins_at.map(encode_time),
        expires: sub.expires_at.map(encode_time),
        version: sub.version(),
    }
}

/// Render affected subscriptions as notification entries, one per callback
/// URL. The notification index is reported as stored; advancing it is the
/// notifier's job, not the registry's.
fn subscribers_to_notify(subscriptions: Vec<Subscription>) -> Vec<SubscriberToNotify> {
    let mut result: Vec<SubscriberToNotify> = Vec::new();
    for sub in subscriptions {
        let state = SubscriptionState {
            subscription: sub.id.to_string(),
            notification_index: sub.notification_index,
        };
        match result.iter_mut().find(|entry| entry.url == sub.url) {
            Some(entry) => entry.subscriptions.push(state),
            None => result.push(SubscriberToNotify {
                url: sub.url,
                subscriptions: vec![state],
            }),
        }
    }
    result
}

/// Extents decoded for an ISA patch; absent pieces stay `None`.
fn isa_patch_from(
    extents: &Volume4D,
    flights_url: &str,
    winding: Winding,
) -> Result<IsaPatch, Status> {
    Ok(IsaPatch {
        url: (!flights_url.is_empty()).then(|| flights_url.to_string()),
        cells: if extents.area.is_empty() {
            None
        } else {
            Some(decode_cells(&extents.area, winding)?)
        },
        starts_at: extents
            .time_start
            .as_ref()
            .map(decode_time)
            .transpose()?,
        ends_at: extents.time_end.as_ref().map(decode_time).transpose()?,
        altitude_lo: (extents.altitude_lo != 0.0).then_some(extents.altitude_lo),
        altitude_hi: (extents.altitude_hi != 0.0).then_some(extents.altitude_hi),
    })
}

#[tonic::async_trait]
impl DiscoveryAndSynchronizationService for DssService {
    async fn get_identification_service_area(
        &self,
        request: Request<GetIdentificationServiceAreaRequest>,
    ) -> Result<Response<GetIdentificationServiceAreaResponse>, Status> {
        auth::authorize(&request, "GetIdentificationServiceArea")?;
        let req = request.into_inner();
        let id = parse_id(&req.id)?;

        let isa = self.store.get_isa(id).await.map_err(store_status)?;

        Ok(Response::new(GetIdentificationServiceAreaResponse {
            service_area: Some(isa_to_proto(&isa)),
        }))
    }

    async fn put_identification_service_area(
        &self,
        request: Request<PutIdentificationServiceAreaRequest>,
    ) -> Result<Response<PutIdentificationServiceAreaResponse>, Status> {
        let owner = auth::authorize(&request, "PutIdentificationServiceArea")?;
        let req = request.into_inner();
        let id = parse_id(&req.id)?;
        let extents = req
            .extents
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("missing extents"))?;

        let (isa, subscriptions) = if req.version.is_empty() {
            // No version: create.
            let starts_at = extents
                .time_start
                .as_ref()
                .ok_or_else(|| Status::invalid_argument("missing time_start"))
                .and_then(decode_time)?;
            let ends_at = extents
                .time_end
                .as_ref()
                .ok_or_else(|| Status::invalid_argument("missing time_end"))
                .and_then(decode_time)?;

            let isa = IdentificationServiceArea {
                id,
                owner,
                url: req.flights_url.clone(),
                cells: decode_cells(&extents.area, self.winding)?,
                starts_at,
                ends_at,
                updated_at: Utc::now(),
                altitude_lo: extents.altitude_lo,
                altitude_hi: extents.altitude_hi,
            };
            self.store.insert_isa(isa).await.map_err(store_status)?
        } else {
            let patch = isa_patch_from(extents, &req.flights_url, self.winding)?;
            self.store
                .update_isa(id, &owner, &req.version, patch)
                .await
                .map_err(store_status)?
        };

        info!(id = %isa.id, subscribers = subscriptions.len(), "ISA put");

        Ok(Response::new(PutIdentificationServiceAreaResponse {
            service_area: Some(isa_to_proto(&isa)),
            subscribers: subscribers_to_notify(subscriptions),
        }))
    }

    async fn patch_identification_service_area(
        &self,
        request: Request<PatchIdentificationServiceAreaRequest>,
    ) -> Result<Response<PatchIdentificationServiceAreaResponse>, Status> {
        let owner = auth::authorize(&request, "PatchIdentificationServiceArea")?;
        let req = request.into_inner();
        let id = parse_id(&req.id)?;

        let patch = match req.extents.as_ref() {
            Some(extents) => isa_patch_from(extents, &req.flights_url, self.winding)?,
            None => IsaPatch {
                url: (!req.flights_url.is_empty()).then(|| req.flights_url.clone()),
                ..Default::default()
            },
        };

        let (isa, subscriptions) = self
            .store
            .update_isa(id, &owner, &req.version, patch)
            .await
            .map_err(store_status)?;

        Ok(Response::new(PatchIdentificationServiceAreaResponse {
            service_area: Some(isa_to_proto(&isa)),
            subscribers: subscribers_to_notify(subscriptions),
        }))
    }

    async fn delete_identification_service_area(
        &self,
        request: Request<DeleteIdentificationServiceAreaRequest>,
    ) -> Result<Response<DeleteIdentificationServiceAreaResponse>, Status> {
        let owner = auth::authorize(&request, "DeleteIdentificationServiceArea")?;
        let req = request.into_inner();
        let id = parse_id(&req.id)?;

        let (isa, subscriptions) = self
            .store
            .delete_isa(id, &owner, &req.version)
            .await
            .map_err(store_status)?;

        info!(id = %isa.id, subscribers = subscriptions.len(), "ISA deleted");

        Ok(Response::new(DeleteIdentificationServiceAreaResponse {
            service_area: Some(isa_to_proto(&isa)),
            subscribers: subscribers_to_notify(subscriptions),
        }))
    }

    async fn search_identification_service_areas(
        &self,
        request: Request<SearchIdentificationServiceAreasRequest>,
    ) -> Result<Response<SearchIdentificationServiceAreasResponse>, Status> {
        auth::authorize(&request, "SearchIdentificationServiceAreas")?;
        let req = request.into_inner();

        let cells = decode_cells(&req.area, self.winding)?;
        let earliest = req.earliest_time.as_ref().map(decode_time).transpose()?;
        let latest = req.latest_time.as_ref().map(decode_time).transpose()?;

        let isas = self
            .store
            .search_isas(&cells, earliest, latest)
            .await
            .map_err(store_status)?;

        Ok(Response::new(SearchIdentificationServiceAreasResponse {
            service_areas: isas.iter().map(isa_to_proto).collect(),
        }))
    }

    async fn get_subscription(
        &self,
        request: Request<GetSubscriptionRequest>,
    ) -> Result<Response<GetSubscriptionResponse>, Status> {
        auth::authorize(&request, "GetSubscription")?;
        let req = request.into_inner();
        let id = parse_id(&req.id)?;

        let sub = self.store.get_subscription(id).await.map_err(store_status)?;

        Ok(Response::new(GetSubscriptionResponse {
            subscription: Some(subscription_to_proto(&sub)),
        }))
    }

    async fn put_subscription(
        &self,
        request: Request<PutSubscriptionRequest>,
    ) -> Result<Response<PutSubscriptionResponse>, Status> {
        let owner = auth::authorize(&request, "PutSubscription")?;
        let req = request.into_inner();
        let id = parse_id(&req.id)?;
        let extents = req
            .extents
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("missing extents"))?;
        let url = req
            .callbacks
            .as_ref()
            .map(|c| c.identification_service_area_url.clone())
            .unwrap_or_default();

        let sub = if req.version.is_empty() {
            let sub = Subscription {
                id,
                owner,
                url,
                notification_index: 0,
                cells: decode_cells(&extents.area, self.winding)?,
                begins_at: extents.time_start.as_ref().map(decode_time).transpose()?,
                expires_at: extents.time_end.as_ref().map(decode_time).transpose()?,
                updated_at: Utc::now(),
                altitude_lo: extents.altitude_lo,
                altitude_hi: extents.altitude_hi,
            };
            self.store
                .insert_subscription(sub)
                .await
                .map_err(store_status)?
        } else {
            let patch = subscription_patch_from(extents, &url, self.winding)?;
            self.store
                .update_subscription(id, &owner, &req.version, patch)
                .await
                .map_err(store_status)?
        };

        Ok(Response::new(PutSubscriptionResponse {
            subscription: Some(subscription_to_proto(&sub)),
        }))
    }

    async fn patch_subscription(
        &self,
        request: Request<PatchSubscriptionRequest>,
    ) -> Result<Response<PatchSubscriptionResponse>, Status> {
        let owner = auth::authorize(&request, "PatchSubscription")?;
        let req = request.into_inner();
        let id = parse_id(&req.id)?;
        let url = req
            .callbacks
            .as_ref()
            .map(|c| c.identification_service_area_url.clone())
            .unwrap_or_default();

        let patch = match req.extents.as_ref() {
            Some(extents) => subscription_patch_from(extents, &url, self.winding)?,
            None => SubscriptionPatch {
                url: (!url.is_empty()).then_some(url),
                ..Default::default()
            },
        };

        let sub = self
            .store
            .update_subscription(id, &owner, &req.version, patch)
            .await
            .map_err(store_status)?;

        Ok(Response::new(PatchSubscriptionResponse {
            subscription: Some(subscription_to_proto(&sub)),
        }))
    }

    async fn delete_subscription(
        &self,
        request: Request<DeleteSubscriptionRequest>,
    ) -> Result<Response<DeleteSubscriptionResponse>, Status> {
        let owner = auth::authorize(&request, "DeleteSubscription")?;
        let req = request.into_inner();
        let id = parse_id(&req.id)?;

        let sub = self
            .store
            .delete_subscription(id, &owner, &req.version)
            .await
            .map_err(store_status)?;

        Ok(Response::new(DeleteSubscriptionResponse {
            subscription: Some(subscription_to_proto(&sub)),
        }))
    }

    async fn search_subscriptions(
        &self,
        request: Request<SearchSubscriptionsRequest>,
    ) -> Result<Response<SearchSubscriptionsResponse>, Status> {
        let owner = auth::authorize(&request, "SearchSubscriptions")?;
        let req = request.into_inner();

        let cells = decode_cells(&req.area, self.winding)?;
        let subs = self
            .store
            .search_subscriptions(&cells, &owner)
            .await
            .map_err(store_status)?;

        Ok(Response::new(SearchSubscriptionsResponse {
            subscriptions: subs.iter().map(subscription_to_proto).collect(),
        }))
    }
}

fn subscription_patch_from(
    extents: &Volume4D,
    url: &str,
    winding: Winding,
) -> Result<SubscriptionPatch, Status> {
    Ok(SubscriptionPatch {
        url: (!url.is_empty()).then(|| url.to_string()),
        cells: if extents.area.is_empty() {
            None
        } else {
            Some(decode_cells(&extents.area, winding)?)
        },
        begins_at: extents.time_start.as_ref().map(decode_time).transpose()?,
        expires_at: extents.time_end.as_ref().map(decode_time).transpose()?,
        altitude_lo: (extents.altitude_lo != 0.0).then_some(extents.altitude_lo),
        altitude_hi: (extents.altitude_hi != 0.0).then_some(extents.altitude_hi),
    })
}
