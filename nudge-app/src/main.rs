#[rocket::launch]
fn rocket() -> _ {
    nudge_app::build_rocket()
}
