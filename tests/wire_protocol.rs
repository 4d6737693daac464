use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};

use bookwell::engine::Engine;
use bookwell::wire;

const H: i64 = 3_600_000;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server(name: &str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join("bookwell_int_test");
    std::fs::create_dir_all(&dir).unwrap();
    let wal = dir.join(format!("{name}.wal"));
    let _ = std::fs::remove_file(&wal);
    let engine = Arc::new(Engine::new(wal).unwrap());

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("bookwell")
        .user("bookwell");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn create_room(client: &Client, name: &str) -> i64 {
    let rows = client
        .query(
            &format!("INSERT INTO resources (name) VALUES ('{name}') RETURNING *"),
            &[],
        )
        .await
        .unwrap();
    rows[0].get("id")
}

fn insert_booking(resource_id: i64, start: i64, end: i64) -> String {
    format!(
        r#"INSERT INTO bookings (resource_id, start, "end", booked_by) VALUES ({resource_id}, {start}, {end}, 'ada')"#
    )
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&SqlState> {
    err.code()
}

// ── Tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn booking_lifecycle_over_the_wire() {
    let addr = start_test_server("lifecycle").await;
    let client = connect(addr).await;
    let room = create_room(&client, "Room A").await;

    let rows = client
        .query(
            &format!(
                r#"INSERT INTO bookings (resource_id, start, "end", booked_by, purpose) VALUES ({room}, {}, {}, 'ada', 'standup') RETURNING *"#,
                10 * H,
                11 * H
            ),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let booking_id: i64 = rows[0].get("id");
    assert_eq!(rows[0].get::<_, i64>("resource_id"), room);
    assert_eq!(rows[0].get::<_, String>("purpose"), "standup");

    // Abutting booking on either side is fine.
    assert_eq!(client.execute(&insert_booking(room, 11 * H, 12 * H), &[]).await.unwrap(), 1);
    assert_eq!(client.execute(&insert_booking(room, 9 * H, 10 * H), &[]).await.unwrap(), 1);

    let rows = client
        .query(&format!("SELECT * FROM bookings WHERE resource_id = {room}"), &[])
        .await
        .unwrap();
    let starts: Vec<i64> = rows.iter().map(|r| r.get("start")).collect();
    assert_eq!(starts, vec![9 * H, 10 * H, 11 * H]);

    let updated = client
        .execute(
            &format!("UPDATE bookings SET purpose = 'retro' WHERE id = {booking_id}"),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let deleted = client
        .execute(&format!("DELETE FROM bookings WHERE id = {booking_id}"), &[])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    let deleted = client
        .execute(&format!("DELETE FROM bookings WHERE id = {booking_id}"), &[])
        .await
        .unwrap();
    assert_eq!(deleted, 0);
}

#[tokio::test]
async fn rejections_carry_distinct_sqlstates() {
    let addr = start_test_server("sqlstates").await;
    let client = connect(addr).await;
    let room = create_room(&client, "Room A").await;
    client
        .execute(&insert_booking(room, 10 * H, 11 * H), &[])
        .await
        .unwrap();

    let conflict = client
        .execute(&insert_booking(room, 10 * H + 59 * 60_000, 12 * H), &[])
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&conflict), Some(&SqlState::EXCLUSION_VIOLATION));

    let invalid = client
        .execute(&insert_booking(room, 10 * H, 10 * H), &[])
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&invalid), Some(&SqlState::CHECK_VIOLATION));

    let missing = client
        .execute(&insert_booking(room + 100, 10 * H, 11 * H), &[])
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&missing), Some(&SqlState::NO_DATA_FOUND));

    let syntax = client.execute("SELEC * FROM bookings", &[]).await.unwrap_err();
    assert_eq!(sqlstate(&syntax), Some(&SqlState::SYNTAX_ERROR));

    let table = client.execute("SELECT * FROM rooms", &[]).await.unwrap_err();
    assert_eq!(sqlstate(&table), Some(&SqlState::UNDEFINED_TABLE));

    // The connection survives every rejection.
    let rows = client.query("SELECT * FROM bookings", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn conflicts_table_answers_the_check() {
    let addr = start_test_server("conflicts").await;
    let client = connect(addr).await;
    let room = create_room(&client, "Room A").await;
    let rows = client
        .query(
            &format!("{} RETURNING *", insert_booking(room, 10 * H, 11 * H)),
            &[],
        )
        .await
        .unwrap();
    let booking_id: i64 = rows[0].get("id");

    let check = |start: i64, end: i64, exclude: Option<i64>| {
        let exclude = exclude.map_or(String::new(), |id| format!(" AND exclude_id = {id}"));
        format!(
            r#"SELECT * FROM conflicts WHERE resource_id = {room} AND start = {start} AND "end" = {end}{exclude}"#
        )
    };

    let row = client.query_one(&check(11 * H, 12 * H, None), &[]).await.unwrap();
    assert!(!row.get::<_, bool>("conflict"));

    let row = client.query_one(&check(9 * H, 12 * H, None), &[]).await.unwrap();
    assert!(row.get::<_, bool>("conflict"));

    let moved = (10 * H + 30 * 60_000, 11 * H + 30 * 60_000);
    let row = client
        .query_one(&check(moved.0, moved.1, Some(booking_id)), &[])
        .await
        .unwrap();
    assert!(!row.get::<_, bool>("conflict"));
    let row = client.query_one(&check(moved.0, moved.1, None), &[]).await.unwrap();
    assert!(row.get::<_, bool>("conflict"));
}

#[tokio::test]
async fn availability_and_parameters() {
    let addr = start_test_server("availability").await;
    let client = connect(addr).await;
    let room = create_room(&client, "Room A").await;
    client
        .execute(&insert_booking(room, 10 * H, 11 * H), &[])
        .await
        .unwrap();

    let room_param = room.to_string();
    let rows = client
        .query(
            r#"SELECT * FROM availability WHERE resource_id = $1 AND start >= $2 AND "end" <= $3"#,
            &[&room_param, &(9 * H).to_string(), &(12 * H).to_string()],
        )
        .await
        .unwrap();
    let spans: Vec<(i64, i64)> = rows.iter().map(|r| (r.get("start"), r.get("end"))).collect();
    assert_eq!(spans, vec![(9 * H, 10 * H), (11 * H, 12 * H)]);

    let rows = client
        .query("SELECT * FROM resources WHERE id = $1", &[&room_param])
        .await
        .unwrap();
    assert_eq!(rows[0].get::<_, String>("name"), "Room A");
    assert!(rows[0].get::<_, bool>("available"));
    assert_eq!(rows[0].get::<_, Option<String>>("description"), None);
}

#[tokio::test]
async fn batch_insert_is_atomic_over_simple_query() {
    let addr = start_test_server("batch").await;
    let client = connect(addr).await;
    let room = create_room(&client, "Room A").await;

    let overlapping = format!(
        r#"INSERT INTO bookings (resource_id, start, "end", booked_by) VALUES ({room}, 0, 100, 'ada'), ({room}, 50, 150, 'grace')"#
    );
    let err = client.simple_query(&overlapping).await.unwrap_err();
    assert_eq!(sqlstate(&err), Some(&SqlState::EXCLUSION_VIOLATION));

    let ok = format!(
        r#"INSERT INTO bookings (resource_id, start, "end", booked_by) VALUES ({room}, 0, 100, 'ada'), ({room}, 100, 200, 'grace')"#
    );
    let messages = client.simple_query(&ok).await.unwrap();
    assert!(messages
        .iter()
        .any(|m| matches!(m, SimpleQueryMessage::CommandComplete(2))));

    let rows = client.query("SELECT * FROM bookings", &[]).await.unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn deleting_a_resource_cascades() {
    let addr = start_test_server("cascade").await;
    let client = connect(addr).await;
    let room = create_room(&client, "Room A").await;
    client
        .execute(&insert_booking(room, 0, 100), &[])
        .await
        .unwrap();

    let deleted = client
        .execute(&format!("DELETE FROM resources WHERE id = {room}"), &[])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(client.query("SELECT * FROM bookings", &[]).await.unwrap().is_empty());
    assert!(client.query("SELECT * FROM resources", &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn text_parameters_are_stored_verbatim() {
    let addr = start_test_server("verbatim_params").await;
    let client = connect(addr).await;
    let room = create_room(&client, "Room A").await;

    let purpose = "pay $1 deposit, then $2";
    let booked_by = "o'brien";
    let rows = client
        .query(
            r#"INSERT INTO bookings (resource_id, start, "end", booked_by, purpose) VALUES ($1, $2, $3, $4, $5) RETURNING *"#,
            &[
                &room.to_string(),
                &(10 * H).to_string(),
                &(11 * H).to_string(),
                &booked_by,
                &purpose,
            ],
        )
        .await
        .unwrap();
    assert_eq!(rows[0].get::<_, String>("purpose"), purpose);
    assert_eq!(rows[0].get::<_, String>("booked_by"), booked_by);
    let booking_id: i64 = rows[0].get("id");

    client
        .execute(
            "UPDATE bookings SET purpose = $1 WHERE id = $2",
            &[&"'); DELETE FROM bookings WHERE id = $2 --", &booking_id.to_string()],
        )
        .await
        .unwrap();
    let rows = client
        .query("SELECT * FROM bookings WHERE id = $1", &[&booking_id.to_string()])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get::<_, String>("purpose"),
        "'); DELETE FROM bookings WHERE id = $2 --"
    );
}
