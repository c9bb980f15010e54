use chrono::NaiveTime;

use crate::models::Booking;

fn ics_stamp(booking: &Booking, time: &str) -> String {
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S").unwrap_or(NaiveTime::MIN);
    booking.date.and_time(time).format("%Y%m%dT%H%M%S").to_string()
}

/// Lines may not carry raw newlines, commas or semicolons.
fn escape_text(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}

pub fn generate_ics(booking: &Booking, business_name: &str) -> String {
    let dtstart = ics_stamp(booking, &booking.start_time);
    let dtend = ics_stamp(booking, &booking.end_time);
    let dtstamp = booking.created_at.format("%Y%m%dT%H%M%S").to_string();
    let uid = format!("{}@salonbook", booking.id);

    let summary = escape_text(&format!("Appointment at {business_name}"));
    let description = escape_text(&format!(
        "Booking {}{}",
        booking.reference,
        booking
            .notes
            .as_deref()
            .map(|n| format!(" - {n}"))
            .unwrap_or_default()
    ));

    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Salonbook//Bookings//EN\r\n\
         BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         DTSTAMP:{dtstamp}\r\n\
         DTSTART:{dtstart}\r\n\
         DTEND:{dtend}\r\n\
         SUMMARY:{summary}\r\n\
         DESCRIPTION:{description}\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n"
    )
}
