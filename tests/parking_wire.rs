use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use parkd::lots::LotManager;
use parkd::policy::CompatibilityPolicy;
use parkd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("parkd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let lots = Arc::new(LotManager::new(
        dir,
        1000,
        Arc::new(CompatibilityPolicy::standard()),
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let lots = lots.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, lots, "parkd".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect_to(addr: SocketAddr, lot: &str, password: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(lot)
        .user("parkd")
        .password(password);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn connect(addr: SocketAddr, lot: &str) -> Client {
    connect_to(addr, lot, "parkd").await.unwrap()
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn single_row(client: &Client, sql: &str) -> SimpleQueryRow {
    let mut out = rows(client, sql).await;
    assert_eq!(out.len(), 1, "expected one row from {sql}");
    out.remove(0)
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().expect("server error carries a SQLSTATE").code().to_string()
}

fn park_sql(vehicle_type: &str, floor: u32, plate: &str) -> String {
    format!(
        "INSERT INTO parked (vehicle_type, floor, plate_number) VALUES ('{vehicle_type}', {floor}, '{plate}')"
    )
}

fn unpark_sql(plate: &str) -> String {
    format!("DELETE FROM parked WHERE plate_number = '{plate}'")
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn seed_and_list_spots() {
    let addr = start_test_server().await;
    let client = connect(addr, "seed_list").await;

    client.batch_execute("CALL seed_spots()").await.unwrap();

    let spots = rows(&client, "SELECT * FROM spots").await;
    assert_eq!(spots.len(), 120);
    let first = &spots[0];
    assert_eq!(first.get("floor"), Some("1"));
    assert_eq!(first.get("spot_number"), Some("1"));
    assert_eq!(first.get("spot_type"), Some("motorcycle"));
    assert_eq!(first.get("is_occupied"), Some("f"));
    assert_eq!(first.get("plate_number"), None);

    let floor3 = rows(&client, "SELECT * FROM spots WHERE floor = 3").await;
    assert_eq!(floor3.len(), 24);
    assert!(floor3.iter().all(|r| r.get("floor") == Some("3")));
    assert_eq!(floor3[23].get("spot_type"), Some("large"));
}

#[tokio::test]
async fn park_and_unpark_bus() {
    let addr = start_test_server().await;
    let client = connect(addr, "bus").await;
    client.batch_execute("CALL seed_spots()").await.unwrap();

    let parked = single_row(&client, &park_sql("bus", 1, "XYZ123")).await;
    assert_eq!(parked.get("floor"), Some("1"));
    assert_eq!(parked.get("spot_number"), Some("21"));
    assert_eq!(parked.get("spot_type"), Some("large"));
    assert_eq!(
        parked.get("message"),
        Some("Vehicle parked on floor #1 at spot #21")
    );

    let occupied: Vec<_> = rows(&client, "SELECT * FROM spots WHERE floor = 1")
        .await
        .into_iter()
        .filter(|r| r.get("is_occupied") == Some("t"))
        .collect();
    assert_eq!(occupied.len(), 1);
    assert_eq!(occupied[0].get("vehicle_type"), Some("bus"));
    assert_eq!(occupied[0].get("plate_number"), Some("XYZ123"));

    let unparked = single_row(&client, &unpark_sql("XYZ123")).await;
    assert_eq!(unparked.get("spot_number"), Some("21"));
    assert_eq!(unparked.get("message"), Some("Car unparked!"));

    assert_eq!(sqlstate(&client, &unpark_sql("XYZ123")).await, "P0002");
}

#[tokio::test]
async fn full_floor_reports_no_available_spot() {
    let addr = start_test_server().await;
    let client = connect(addr, "full").await;
    client.batch_execute("CALL seed_spots()").await.unwrap();

    for i in 0..4 {
        single_row(&client, &park_sql("bus", 2, &format!("BUS{i}"))).await;
    }
    assert_eq!(sqlstate(&client, &park_sql("bus", 2, "BUS4")).await, "P0001");

    let floors = rows(&client, "SELECT * FROM floors").await;
    assert_eq!(floors.len(), 5);
    let floor2 = floors.iter().find(|r| r.get("floor") == Some("2")).unwrap();
    assert_eq!(floor2.get("total"), Some("24"));
    assert_eq!(floor2.get("available"), Some("20"));
}

#[tokio::test]
async fn missing_fields_are_rejected() {
    let addr = start_test_server().await;
    let client = connect(addr, "missing").await;
    client.batch_execute("CALL seed_spots()").await.unwrap();

    assert_eq!(
        sqlstate(
            &client,
            "INSERT INTO parked (vehicle_type, plate_number) VALUES ('car', 'NOFLOOR')"
        )
        .await,
        "23502"
    );
    assert_eq!(
        sqlstate(&client, "INSERT INTO parked VALUES ('car', 1, NULL)").await,
        "23502"
    );
    assert_eq!(sqlstate(&client, "DELETE FROM parked").await, "23502");
}

#[tokio::test]
async fn bad_sql_is_a_syntax_error() {
    let addr = start_test_server().await;
    let client = connect(addr, "syntax").await;

    assert_eq!(sqlstate(&client, "SELEKT * FROM spots").await, "42601");
    assert_eq!(sqlstate(&client, "SELECT * FROM bookings").await, "42601");
    assert_eq!(sqlstate(&client, "CALL drop_everything()").await, "42601");
}

#[tokio::test]
async fn positional_insert_parks() {
    let addr = start_test_server().await;
    let client = connect(addr, "positional").await;
    client.batch_execute("CALL seed_spots()").await.unwrap();

    let row = single_row(&client, "INSERT INTO parked VALUES ('car', 4, 'POS1')").await;
    assert_eq!(row.get("floor"), Some("4"));
    assert_eq!(row.get("spot_number"), Some("9"));
    assert_eq!(row.get("spot_type"), Some("compact"));
}

#[tokio::test]
async fn extended_protocol_parks_with_parameters() {
    let addr = start_test_server().await;
    let client = connect(addr, "extended").await;
    client.batch_execute("CALL seed_spots()").await.unwrap();

    client
        .execute(
            "INSERT INTO parked (vehicle_type, floor, plate_number) VALUES ($1, $2, $3)",
            &[&"motorcycle", &"5", &"EXT1"],
        )
        .await
        .unwrap();

    let occupied: Vec<_> = rows(&client, "SELECT * FROM spots WHERE floor = 5")
        .await
        .into_iter()
        .filter(|r| r.get("plate_number") == Some("EXT1"))
        .collect();
    assert_eq!(occupied.len(), 1);
    assert_eq!(occupied[0].get("spot_number"), Some("1"));
}

#[tokio::test]
async fn lots_are_isolated_by_database() {
    let addr = start_test_server().await;
    let north = connect(addr, "north").await;
    let south = connect(addr, "south").await;

    north.batch_execute("CALL seed_spots()").await.unwrap();
    single_row(&north, &park_sql("car", 1, "ISO")).await;

    assert!(rows(&south, "SELECT * FROM spots").await.is_empty());
    assert_eq!(sqlstate(&south, &park_sql("car", 1, "ISO")).await, "P0001");
    assert_eq!(sqlstate(&south, &unpark_sql("ISO")).await, "P0002");
}

#[tokio::test]
async fn shared_lot_across_connections() {
    let addr = start_test_server().await;
    let a = connect(addr, "shared").await;
    let b = connect(addr, "shared").await;

    a.batch_execute("CALL seed_spots()").await.unwrap();
    single_row(&a, &park_sql("car", 3, "SHARED")).await;

    let row = single_row(&b, &unpark_sql("SHARED")).await;
    assert_eq!(row.get("floor"), Some("3"));
}

#[tokio::test]
async fn concurrent_clients_never_share_a_spot() {
    let addr = start_test_server().await;
    let setup = connect(addr, "race").await;
    setup.batch_execute("CALL seed_spots()").await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        handles.push(tokio::spawn(async move {
            let client = connect(addr, "race").await;
            client
                .simple_query(&park_sql("bus", 1, &format!("RACE{i}")))
                .await
                .is_ok()
        }));
    }

    let mut parked = 0;
    for h in handles {
        if h.await.unwrap() {
            parked += 1;
        }
    }
    assert_eq!(parked, 4);

    let floor1 = rows(&setup, "SELECT * FROM spots WHERE floor = 1").await;
    let occupied = floor1.iter().filter(|r| r.get("is_occupied") == Some("t")).count();
    assert_eq!(occupied, 4);
}

#[tokio::test]
async fn wrong_password_rejected() {
    let addr = start_test_server().await;
    assert!(connect_to(addr, "auth", "not-the-password").await.is_err());
}
