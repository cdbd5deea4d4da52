// Inference prompt templates. All prompts for photo analysis live here.

pub const PHOTO_ANALYST_SYSTEM: &str = "\
You are a careful photo analyst. You infer where and when a photograph was taken \
from visual evidence only: landmarks, signage, vegetation, architecture, weather, \
clothing, vehicles. Never invent certainty you do not have.";

pub const ANALYZE_PROMPT: &str = r#"Analyze the attached photograph.

OUTPUT SCHEMA (return exactly this structure):
{
  "location_name": "most specific place you can identify, e.g. 'Fushimi Inari Shrine, Kyoto'",
  "country": "country name" | null,
  "latitude": number,
  "longitude": number,
  "date": "YYYY-MM-DD" | "Unknown",
  "description": "one sentence describing the scene"
}

RULES:
- If you cannot place the photo at all, use latitude 0 and longitude 0.
- Only give a date when the image itself carries evidence (a printed date, an event, a season
  with a year). Otherwise return "Unknown"."#;

pub const LOCATE_PROMPT: &str = r#"The user placed the attached photograph at latitude {latitude}, longitude {longitude}.

Name the place at those coordinates, using the image to pick the most fitting
landmark or neighbourhood when several are nearby.

OUTPUT SCHEMA:
{ "location_name": "short place name" }"#;

pub fn locate_prompt(latitude: f64, longitude: f64) -> String {
    LOCATE_PROMPT
        .replace("{latitude}", &format!("{latitude:.6}"))
        .replace("{longitude}", &format!("{longitude:.6}"))
}
