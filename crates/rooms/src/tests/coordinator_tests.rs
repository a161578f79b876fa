use super::*;

#[test]
fn request_methods_parse_case_insensitively() {
    assert_eq!(RequestMethod::parse("post"), RequestMethod::Post);
    assert_eq!(RequestMethod::parse("GET"), RequestMethod::Get);
    assert_eq!(
        RequestMethod::parse("patch"),
        RequestMethod::Other("PATCH".into())
    );
}

#[test]
fn decrement_clamps_at_zero() {
    let room = RoomId::new("r").expect("room");
    let mut total = 1;
    decrement_total(&mut total, &room);
    assert_eq!(total, 0);
    decrement_total(&mut total, &room);
    assert_eq!(total, 0);
}
