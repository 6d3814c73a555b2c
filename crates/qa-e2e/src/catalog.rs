//! Built-in regression scenario for the listing pipeline: points of
//! interest, media assets, generated scripts, transcriptions and renders.

use serde_json::json;

use crate::expect::Expect;
use crate::step::{Call, Poll, Scenario, Step};

pub const POI: &str = "poi";
pub const ASSET: &str = "asset";
pub const SCRIPT: &str = "script";
pub const TRANSCRIPTION: &str = "transcription";
pub const RENDER: &str = "render";

const POI_FIELDS: &[&str] = &[
    "/id",
    "/name",
    "/description",
    "/address",
    "/lat",
    "/lon",
    "/status",
    "/version",
    "/poi_type",
    "/tags",
    "/metadata",
    "/created_at",
    "/updated_at",
];
const ASSET_FIELDS: &[&str] = &["/id", "/poi_id", "/name", "/asset_type", "/version", "/created_at", "/updated_at"];
const SCRIPT_FIELDS: &[&str] = &[
    "/id",
    "/poi_id",
    "/title",
    "/scenes",
    "/total_duration_seconds",
    "/narration_text",
    "/tone",
    "/nlp_provider",
];

fn transition(action: &str, status: u16) -> Call {
    Call::post(POI, &format!("/pois/{{poi_id}}/{action}"))
        .label(format!("POST /pois/{{id}}/{action} -> {status}"))
        .status(status)
}

fn health(services: &[&str]) -> Step {
    let mut step = Step::new("health_readiness");
    for service in services {
        step = step
            .then(
                Call::get(service, "/healthz")
                    .label(format!("{service} /healthz"))
                    .status(200)
                    .equals("/status", json!("ok"))
                    .has(&["/service"]),
            )
            .then(Call::get(service, "/readyz").label(format!("{service} /readyz")).status(200));
    }
    step
}

fn auth() -> Step {
    Step::new("error_paths_auth")
        .negative()
        .then(Call::get(POI, "/pois").without_key().label("GET /pois without key").status(401))
        .then(
            Call::get(POI, "/pois")
                .with_key("wrong-key")
                .label("GET /pois with wrong key")
                .status(401),
        )
        .then(Call::get(POI, "/healthz").without_key().label("GET /healthz without key").status(200))
        .then(Call::get(ASSET, "/assets").without_key().label("GET /assets without key").status(401))
        .then(Call::get(SCRIPT, "/scripts").without_key().label("GET /scripts without key").status(401))
}

fn validation() -> Step {
    let rejected = |label: &str, service: &str, path: &str, body: serde_json::Value| {
        Call::post(service, path).label(label).body(body).status(422)
    };
    Step::new("error_paths_validation")
        .negative()
        .then(rejected(
            "POST /pois invalid lat",
            POI,
            "/pois",
            json!({"name": "Bad POI", "lat": 999, "lon": 2.0}),
        ))
        .then(rejected(
            "POST /pois missing required fields",
            POI,
            "/pois",
            json!({"description": "no name, no lat, no lon"}),
        ))
        .then(rejected(
            "POST /pois empty name",
            POI,
            "/pois",
            json!({"name": "", "lat": 48.0, "lon": 2.0}),
        ))
        .then(rejected(
            "POST /pois invalid lon",
            POI,
            "/pois",
            json!({"name": "Bad", "lat": 48.0, "lon": 999.0}),
        ))
        .then(rejected("POST /assets empty body", ASSET, "/assets", json!({})))
}

fn create_poi() -> Step {
    Step::new("create_poi").then(
        Call::post(POI, "/pois")
            .body(json!({
                "name": "QA E2E Villa {run_suffix}",
                "description": "Listing created by the regression pipeline",
                "address": "42 Rue de la Paix, 75002 Paris",
                "lat": 48.8698,
                "lon": 2.3308,
                "poi_type": "villa",
                "tags": ["qa", "e2e", "regression"],
                "metadata": {
                    "surface_m2": 350,
                    "bedrooms": 5,
                    "price_eur": 2500000,
                    "energy_class": "B"
                }
            }))
            .status(201)
            .has(POI_FIELDS)
            .equals("/status", json!("draft"))
            .equals("/version", json!(1))
            .equals("/poi_type", json!("villa"))
            .equals("/tags", json!(["qa", "e2e", "regression"]))
            .equals("/metadata/surface_m2", json!(350))
            .equals("/metadata/energy_class", json!("B"))
            .expect(Expect::IsUuid("/id".into()))
            .extract("poi_id", "/id"),
    )
}

fn update_draft() -> Step {
    Step::new("update_poi").then(
        Call::patch(POI, "/pois/{poi_id}")
            .body(json!({
                "description": "Updated by the regression pipeline",
                "tags": ["qa", "e2e", "regression", "updated"],
                "metadata": {"surface_m2": 350, "bedrooms": 5, "price_eur": 2500000, "renovated": true}
            }))
            .status(200)
            .expect(Expect::Contains("/tags".into(), json!("updated")))
            .expect(Expect::Contains("/description".into(), json!("regression pipeline")))
            .equals("/version", json!(1))
            .equals("/metadata/renovated", json!(true)),
    )
}

fn validate_and_publish() -> Step {
    Step::new("validate_publish_poi")
        .then(transition("publish", 409))
        .then(transition("archive", 409))
        .then(transition("validate", 200).equals("/status", json!("validated")))
        .then(transition("validate", 409))
        .then(transition("archive", 409))
        .then(transition("publish", 200).equals("/status", json!("published")))
        .then(transition("validate", 409))
        .then(transition("publish", 409))
        .then(
            Call::patch(POI, "/pois/{poi_id}")
                .label("PATCH published POI")
                .body(json!({"description": "Post-publish edit, version bumps to 2"}))
                .status(200)
                .equals("/version", json!(2)),
        )
}

fn create_assets() -> Step {
    let asset = |var: &str, body: serde_json::Value| {
        let name = body["name"].clone();
        Call::post(ASSET, "/assets")
            .label(format!("POST /assets ({var})"))
            .body(body)
            .status(201)
            .has(ASSET_FIELDS)
            .equals("/poi_id", json!("{poi_id}"))
            .equals("/version", json!(1))
            .equals("/name", name)
            .extract(var, "/id")
    };

    Step::new("create_assets")
        .then(asset(
            "photo_asset_id",
            json!({
                "poi_id": "{poi_id}",
                "name": "facade-drone-hd.jpg",
                "asset_type": "photo",
                "description": "Aerial facade shot",
                "file_path": "/data/assets/facade-drone.jpg",
                "mime_type": "image/jpeg",
                "file_size": 4500000,
                "metadata": {"camera": "DJI Mavic 3", "resolution": "5280x3956"}
            }),
        ))
        .then(asset(
            "video_asset_id",
            json!({
                "poi_id": "{poi_id}",
                "name": "virtual-tour-4k.mp4",
                "asset_type": "raw_video",
                "description": "Full 4K HDR virtual tour",
                "file_path": "/data/assets/virtual-tour-4k.mp4",
                "mime_type": "video/mp4",
                "file_size": 52428800,
                "metadata": {"duration_seconds": 204, "codec": "h265"}
            }),
        ))
        .then(
            Call::get(ASSET, "/assets?poi_id={poi_id}")
                .status(200)
                .expect(Expect::Len("/items".into(), 2)),
        )
        .then(
            Call::patch(ASSET, "/assets/{photo_asset_id}")
                .body(json!({"description": "Facade shot, colour graded"}))
                .status(200)
                .equals("/version", json!(2)),
        )
}

fn generate_script() -> Step {
    Step::new("generate_script")
        .then(
            Call::post(SCRIPT, "/scripts/generate?poi_id={poi_id}")
                .status(201)
                .has(SCRIPT_FIELDS)
                .equals("/poi_id", json!("{poi_id}"))
                .expect(Expect::MinLen("/scenes".into(), 1))
                .expect(Expect::GreaterThan("/total_duration_seconds".into(), 0.0))
                .expect(Expect::MinLen("/narration_text".into(), 11))
                .expect(Expect::EachHas(
                    "/scenes".into(),
                    vec!["scene_number".into(), "title".into(), "duration_seconds".into()],
                ))
                .extract("script_id", "/id"),
        )
        .then(
            Call::get(SCRIPT, "/scripts/{script_id}")
                .status(200)
                .equals("/id", json!("{script_id}")),
        )
        .then(
            Call::get(SCRIPT, "/scripts?poi_id={poi_id}")
                .status(200)
                .expect(Expect::AtLeast("/total".into(), 1.0)),
        )
}

fn transcription() -> Step {
    Step::new("transcription")
        .then(
            Call::post(
                TRANSCRIPTION,
                "/transcriptions/start?poi_id={poi_id}&asset_video_id={video_asset_id}",
            )
            .status(201)
            .has(&["/id", "/status", "/poi_id", "/asset_video_id"])
            .extract("transcription_id", "/id"),
        )
        .then(Poll::new(
            Call::get(TRANSCRIPTION, "/transcriptions/{transcription_id}")
                .equals("/status", json!("completed"))
                .expect(Expect::MinLen("/text".into(), 11))
                .expect(Expect::GreaterThan("/confidence".into(), 0.0))
                .expect(Expect::MinLen("/segments".into(), 1))
                .expect(Expect::EachHas(
                    "/segments".into(),
                    vec!["start".into(), "end".into(), "text".into()],
                )),
            vec![Expect::Status(200), Expect::Equals("/status".into(), json!("completed"))],
        ))
}

fn render_pipeline() -> Step {
    Step::new("render_pipeline")
        .then(Poll::new(
            Call::get(RENDER, "/renders?poi_id={poi_id}")
                .label("render job created")
                .extract("render_id", "/items/0/id"),
            vec![Expect::Status(200), Expect::MinLen("/items".into(), 1)],
        ))
        .then(
            Poll::new(
                Call::get(RENDER, "/renders/{render_id}")
                    .label("render completed")
                    .expect(Expect::GreaterThan("/completed_scenes".into(), 0.0))
                    .has(&["/output_path"]),
                vec![Expect::OneOf("/status".into(), vec![json!("completed"), json!("done")])],
            )
            .tolerate_timeout(),
        )
}

fn publish_render() -> Step {
    Step::new("publish_video")
        .then(
            Call::post(RENDER, "/renders/{render_id}/publish")
                .status(200)
                .has(&["/published_url", "/published_at"])
                .expect(Expect::Contains("/published_url".into(), json!("cdn"))),
        )
        .then(
            Call::post(RENDER, "/renders/{render_id}/publish")
                .label("re-publish render")
                .expect(Expect::StatusIn(vec![200, 409])),
        )
}

fn archive() -> Step {
    Step::new("archive_poi")
        .negative()
        .then(transition("archive", 200).equals("/status", json!("archived")))
        .then(transition("archive", 409))
        .then(transition("validate", 409))
        .then(transition("publish", 409))
}

fn not_found() -> Step {
    let checks = [
        (POI, "/pois/{unknown_id}"),
        (ASSET, "/assets/{unknown_id}"),
        (SCRIPT, "/scripts/{unknown_id}"),
        (TRANSCRIPTION, "/transcriptions/{unknown_id}"),
        (RENDER, "/renders/{unknown_id}"),
    ];
    checks.into_iter().fold(Step::new("error_paths_404").negative(), |step, (service, path)| {
        step.then(
            Call::get(service, path)
                .status(404)
                .equals("/error", json!("not_found"))
                .has(&["/detail"]),
        )
    })
}

fn consistency() -> Step {
    Step::new("consistency_check")
        .then(
            Call::get(POI, "/pois/{poi_id}")
                .status(200)
                .equals("/status", json!("archived"))
                .expect(Expect::AtLeast("/version".into(), 2.0)),
        )
        .then(
            Call::get(ASSET, "/assets?poi_id={poi_id}")
                .status(200)
                .expect(Expect::Len("/items".into(), 2)),
        )
        .then(
            Call::get(SCRIPT, "/scripts?poi_id={poi_id}")
                .status(200)
                .expect(Expect::AtLeast("/total".into(), 1.0)),
        )
        .then(
            Call::get(POI, "/pois?page=1&page_size=5")
                .status(200)
                .has(&["/items", "/total", "/page", "/page_size"]),
        )
}

/// The full listing lifecycle, with health checks for `services`.
pub fn listing_pipeline(services: &[&str]) -> Scenario {
    Scenario::new(
        "listing_pipeline",
        vec![
            health(services),
            auth(),
            validation(),
            create_poi(),
            update_draft(),
            validate_and_publish(),
            create_assets(),
            generate_script(),
            transcription(),
            render_pipeline(),
            publish_render(),
            archive(),
            not_found(),
            consistency(),
        ],
    )
}
