use std::time::Duration;

use actix_web::{http::header, http::StatusCode, test, web, App, HttpResponse, HttpServer};
use chrono::Utc;
use tokio::sync::mpsc;

use onvif_service::api;
use onvif_service::auth::digest::{Algorithm, DigestCredentials, REALM};
use onvif_service::events::{Notification, SimpleItem};
use onvif_service::model::{Config, UserConfig, UserLevel};
use onvif_service::onvif::{Onvif, DEVICE_SERVICE, EVENTS_SERVICE, EVENTS_SUBSCRIPTION, MEDIA_SERVICE};
use onvif_service::soap;

const PASSWORD_TEXT: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";

fn request(header: &str, body: &str) -> String {
    format!(
        "<s:Envelope xmlns:s=\"{}\" xmlns:wsa=\"{}\" xmlns:wsse=\"{}\" xmlns:tds=\"{}\" xmlns:trt=\"{}\" xmlns:tev=\"{}\" xmlns:wsnt=\"{}\" xmlns:tt=\"{}\"><s:Header>{}</s:Header><s:Body>{}</s:Body></s:Envelope>",
        soap::SOAP12,
        soap::WSA,
        soap::WSSE,
        soap::TDS,
        soap::TRT,
        soap::TEV,
        soap::WSNT,
        soap::TT,
        header,
        body
    )
}

fn with_token(user: &str, password: &str, body: &str) -> String {
    let header = format!(
        "<wsse:Security><wsse:UsernameToken><wsse:Username>{}</wsse:Username><wsse:Password Type=\"{}\">{}</wsse:Password></wsse:UsernameToken></wsse:Security>",
        user, PASSWORD_TEXT, password
    );
    request(&header, body)
}

fn with_admin_token(body: &str) -> String {
    with_token("admin", "password", body)
}

fn digest_authorization(nonce: &str, uri: &str, user: &str, password: &str) -> String {
    let mut credentials = DigestCredentials {
        username: user.to_owned(),
        realm: REALM.to_owned(),
        nonce: nonce.to_owned(),
        uri: uri.to_owned(),
        response: String::new(),
        algorithm: Algorithm::Md5,
        qop: Some("auth".to_owned()),
        nc: Some("00000001".to_owned()),
        cnonce: Some("0a4f113b".to_owned()),
        opaque: None,
    };
    credentials.response = credentials.expected_response(password, "POST");

    format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", qop=auth, nc=00000001, cnonce=\"0a4f113b\", response=\"{}\"",
        credentials.username, credentials.realm, credentials.nonce, credentials.uri, credentials.response
    )
}

fn soap_post(path: &str, body: String) -> test::TestRequest {
    test::TestRequest::post()
        .uri(path)
        .insert_header((header::CONTENT_TYPE, soap::CONTENT_TYPE))
        .set_payload(body)
}

fn text_between<'a>(s: &'a str, start: &str, end: &str) -> &'a str {
    let from = s.find(start).unwrap() + start.len();
    let to = s[from..].find(end).unwrap() + from;
    &s[from..to]
}

macro_rules! app {
    ($onvif:expr) => {{
        let onvif = $onvif;
        let endpoints = api::endpoints(&onvif).unwrap();
        test::init_service(App::new().configure(|cfg| api::configure(cfg, &onvif, &endpoints))).await
    }};
}

#[actix_web::test]
async fn pre_auth_operations_need_no_credentials() {
    let app = app!(Onvif::new(Config::default()).unwrap());

    let req = soap_post(DEVICE_SERVICE, request("", "<tds:GetSystemDateAndTime/>")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("GetSystemDateAndTimeResponse"));
    assert!(body.contains("<tt:DateTimeType>NTP</tt:DateTimeType>") || body.contains("DateTimeType"));
}

#[actix_web::test]
async fn protected_operations_are_challenged() {
    let app = app!(Onvif::new(Config::default()).unwrap());

    let req = soap_post(MEDIA_SERVICE, request("", "<trt:GetProfiles/>")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let challenge = resp.headers().get(header::WWW_AUTHENTICATE).unwrap().to_str().unwrap().to_owned();
    assert!(challenge.starts_with("Digest "));
    assert!(challenge.contains("realm=\"onvif\""));
    assert!(!challenge.contains("stale"));
}

#[actix_web::test]
async fn digest_credentials_open_protected_operations() {
    let app = app!(Onvif::new(Config::default()).unwrap());

    let req = soap_post(MEDIA_SERVICE, request("", "<trt:GetProfiles/>")).to_request();
    let resp = test::call_service(&app, req).await;
    let challenge = resp.headers().get(header::WWW_AUTHENTICATE).unwrap().to_str().unwrap().to_owned();
    let nonce = text_between(&challenge, "nonce=\"", "\"").to_owned();

    let authorization = digest_authorization(&nonce, MEDIA_SERVICE, "admin", "password");

    let req = soap_post(MEDIA_SERVICE, request("", "<trt:GetProfiles/>"))
        .insert_header((header::AUTHORIZATION, authorization))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("token=\"Profile_1\""));
}

#[actix_web::test]
async fn wrong_password_is_challenged_again() {
    let app = app!(Onvif::new(Config::default()).unwrap());

    let body = request(
        &format!(
            "<wsse:Security><wsse:UsernameToken><wsse:Username>admin</wsse:Username><wsse:Password Type=\"{}\">nope</wsse:Password></wsse:UsernameToken></wsse:Security>",
            PASSWORD_TEXT
        ),
        "<trt:GetProfiles/>",
    );
    let resp = test::call_service(&app, soap_post(MEDIA_SERVICE, body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn unknown_operation_is_a_receiver_fault() {
    let app = app!(Onvif::new(Config::default()).unwrap());

    let req = soap_post(DEVICE_SERVICE, request("", "<tds:FormatTheDisk/>")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("ActionNotSupported"));
}

#[actix_web::test]
async fn wsdl_is_served_on_get() {
    let app = app!(Onvif::new(Config::default()).unwrap());

    let req = test::TestRequest::get().uri(&format!("{}?wsdl", EVENTS_SERVICE)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("wsdl:portType name=\"EventPortType\""));
    assert!(body.contains("CreatePullPointSubscription"));

    let req = test::TestRequest::get().uri(EVENTS_SERVICE).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn pull_point_lifecycle() {
    let onvif = Onvif::new(Config::default()).unwrap();
    let subscriptions = onvif.subscriptions().clone();
    let app = app!(onvif);

    let create = with_admin_token(
        "<tev:CreatePullPointSubscription><tev:InitialTerminationTime>PT60S</tev:InitialTerminationTime></tev:CreatePullPointSubscription>",
    );
    let resp = test::call_service(&app, soap_post(EVENTS_SERVICE, create).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    let address = text_between(&body, "<wsa:Address>", "</wsa:Address>").to_owned();
    assert!(address.contains(EVENTS_SUBSCRIPTION));
    let path = &address[address.find(EVENTS_SUBSCRIPTION).unwrap()..];

    subscriptions
        .publish(Notification {
            topic: "tns1:VideoSource/MotionAlarm".to_owned(),
            utc_time: Utc::now(),
            property_operation: None,
            source: vec![SimpleItem::new("Source", "VideoSource_1")],
            data: vec![SimpleItem::new("State", "true")],
        })
        .await;

    let pull = with_admin_token(
        "<tev:PullMessages><tev:Timeout>PT1S</tev:Timeout><tev:MessageLimit>10</tev:MessageLimit></tev:PullMessages>",
    );
    let resp = test::call_service(&app, soap_post(path, pull.clone()).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("PullMessagesResponse"));
    assert!(body.contains("tns1:VideoSource/MotionAlarm"));
    assert!(body.contains("Value=\"true\""));

    let unsubscribe = with_admin_token("<wsnt:Unsubscribe/>");
    let resp = test::call_service(&app, soap_post(path, unsubscribe).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, soap_post(path, pull).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("ResourceUnknownFault"));
}

#[actix_web::test]
async fn old_nonces_get_a_stale_challenge() {
    let onvif = Onvif::new(Config::default()).unwrap();
    let nonce = onvif
        .authenticator()
        .nonces()
        .issue(Utc::now() - chrono::Duration::minutes(10));
    let app = app!(onvif);

    let req = soap_post(MEDIA_SERVICE, request("", "<trt:GetProfiles/>"))
        .insert_header((header::AUTHORIZATION, digest_authorization(&nonce, MEDIA_SERVICE, "admin", "password")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let challenge = resp.headers().get(header::WWW_AUTHENTICATE).unwrap().to_str().unwrap().to_owned();
    assert!(challenge.contains("stale=true"));
    assert_ne!(text_between(&challenge, "nonce=\"", "\""), nonce);
}

#[actix_web::test]
async fn insufficient_level_is_not_authorized() {
    let mut config = Config::default();
    config.users.push(UserConfig {
        user_name: "viewer".to_owned(),
        password: "viewer".to_owned(),
        level: UserLevel::User,
    });
    let app = app!(Onvif::new(config).unwrap());

    let req = soap_post(DEVICE_SERVICE, with_token("viewer", "viewer", "<tds:GetUsers/>")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(resp.headers().get(header::WWW_AUTHENTICATE).is_none());
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("ter:NotAuthorized"));

    let req = soap_post(MEDIA_SERVICE, with_token("viewer", "viewer", "<trt:GetProfiles/>")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

async fn receive_notify(body: String, received: web::Data<mpsc::UnboundedSender<String>>) -> HttpResponse {
    let _ = received.send(body);
    HttpResponse::Ok().finish()
}

#[actix_web::test]
async fn push_subscriptions_receive_notify() {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let consumer = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(tx.clone()))
            .route("/notify", web::post().to(receive_notify))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let consumer_addr = consumer.addrs()[0];
    let consumer = consumer.run();
    let consumer_handle = consumer.handle();
    actix_web::rt::spawn(consumer);

    let onvif = Onvif::new(Config::default()).unwrap();
    let subscriptions = onvif.subscriptions().clone();
    let app = app!(onvif);

    let subscribe = with_admin_token(&format!(
        "<wsnt:Subscribe><wsnt:ConsumerReference><wsa:Address>http://{}/notify</wsa:Address></wsnt:ConsumerReference><wsnt:InitialTerminationTime>PT60S</wsnt:InitialTerminationTime></wsnt:Subscribe>",
        consumer_addr
    ));
    let resp = test::call_service(&app, soap_post(EVENTS_SERVICE, subscribe).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("SubscribeResponse"));
    let reference = text_between(&body, "<wsa:Address>", "</wsa:Address>").to_owned();

    subscriptions
        .publish(Notification {
            topic: "tns1:VideoSource/MotionAlarm".to_owned(),
            utc_time: Utc::now(),
            property_operation: None,
            source: vec![SimpleItem::new("Source", "VideoSource_1")],
            data: vec![SimpleItem::new("State", "true")],
        })
        .await;

    let notify = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no Notify within 5s")
        .unwrap();
    assert!(notify.contains("<wsnt:Notify>"));
    assert!(notify.contains("tns1:VideoSource/MotionAlarm"));
    assert!(notify.contains(&reference));
    assert!(notify.contains(&format!("<wsa:To>http://{}/notify</wsa:To>", consumer_addr)));

    consumer_handle.stop(false).await;
}
