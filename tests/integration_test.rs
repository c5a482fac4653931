// tests/integration_test.rs
#[cfg(test)]
mod tests {
    use actix_web::{test, App};
    use upepo_billing_engine::api::routes;

    #[actix_web::test]
    async fn test_health_endpoint() {
        let app = test::init_service(
            App::new().configure(routes::configure)
        ).await;

        let req = test::TestRequest::get()
            .uri("/api/v1/health")
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "upepo-billing-engine");
    }

    #[actix_web::test]
    async fn test_webhook_route_mounted() {
        let app = test::init_service(
            App::new().configure(routes::configure)
        ).await;

        let payload = r#"{
            "Body": {
                "stkCallback": {
                    "ResultCode": 1032
                }
            }
        }"#;

        let req = test::TestRequest::post()
            .uri("/api/v1/payments/webhook/mpesa")
            .set_payload(payload)
            .insert_header(("content-type", "application/json"))
            .to_request();

        let resp = test::call_service(&app, req).await;

        // Should return 200 or 500, but not 404
        assert_ne!(resp.status().as_u16(), 404);
    }

    #[actix_web::test]
    async fn test_authorize_requires_username() {
        let app = test::init_service(
            App::new().configure(routes::configure)
        ).await;

        let req = test::TestRequest::get()
            .uri("/api/v1/radius/authorize")
            .to_request();

        let resp = test::call_service(&app, req).await;

        // Query extraction fails without a username
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[actix_web::test]
    async fn test_manual_control_routes_mounted() {
        let app = test::init_service(
            App::new().configure(routes::configure)
        ).await;

        for uri in [
            "/api/v1/radius/coa",
            "/api/v1/radius/disconnect",
            "/api/v1/fair-use/burst",
            "/api/v1/compliance/run",
            "/api/v1/sweeps/expiry/run",
        ] {
            let req = test::TestRequest::post()
                .uri(uri)
                .set_payload("{}")
                .insert_header(("content-type", "application/json"))
                .to_request();

            let resp = test::call_service(&app, req).await;
            assert_ne!(resp.status().as_u16(), 404, "route {} not mounted", uri);
        }
    }
}
