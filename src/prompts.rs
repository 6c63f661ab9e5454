//! Prompts sent to the vision models.
//!
//! Keeping every prompt in one module means a wording change touches exactly
//! one place, and tests can assert on the JSON contract each prompt asks for
//! without spinning up a model.
//!
//! Each prompt pins the response shape the caller decodes:
//!
//! | Prompt | Used by | Expected JSON |
//! |--------|---------|---------------|
//! | [`ROI_PROMPT`] | tiling coarse scan | `{"regions": [...]}` |
//! | [`TILE_EXTRACTION_PROMPT`] | tiling detail pass | extraction payload |
//! | [`FULL_DOCUMENT_PROMPT`] | single-shot PDF, full-page fallback | extraction payload |

/// Coarse-scan prompt: locate regions worth reading at high resolution.
pub const ROI_PROMPT: &str = r#"Analyze this construction plan page and identify regions of interest (ROI) that contain important information.

Look for:
- Bid item tables (with item numbers, descriptions, quantities)
- Specification sections
- Project information (name, location, dates)
- Material lists or schedules

For each region, provide a bounding box in pixel coordinates of this image, in this format:
{
  "regions": [
    {
      "label": "bid_items_table",
      "x": 100,
      "y": 200,
      "width": 800,
      "height": 600,
      "confidence": 0.9
    }
  ]
}

Return ONLY the JSON. If no important regions are found, return {"regions": []}."#;

/// Detail-pass prompt for one tile of a plan sheet.
///
/// Tiles are small crops, so the prompt leans toward material takeoff items
/// (lumber sizes, counts, schedules) rather than whole bid tables.
pub const TILE_EXTRACTION_PROMPT: &str = r##"Analyze this section of a construction plan. Extract ANY of the following you can see:

**Materials/Items**: Lumber (2x4, 2x6, etc.), hardware, roofing, windows, doors, concrete, drywall, insulation, etc.
**Quantities**: Counts, dimensions, areas (e.g., "100 SF", "24 EA", "12 LF")
**Specifications**: Codes, standards, material grades, brands
**Project Info**: Name, location, lot number, builder

Return JSON in this EXACT format:
{
  "bid_items": [{"item_number": "1", "description": "2x4 studs", "quantity": 100, "unit": "EA"}],
  "materials": [{"name": "2x4 Pine Studs", "quantity": 100, "unit": "EA"}],
  "specifications": [{"code": "#2 Pine", "description": "Framing lumber grade"}],
  "project_info": {"name": "Lot 195", "location": "Lafayette", "bid_date": null}
}

IMPORTANT:
- Extract materials/lumber from drawings, notes, schedules
- Look for dimensions like "2x4", "2x6", quantities like "@ 16\" O.C."
- Include window/door schedules
- Return ONLY JSON, no other text
- If nothing is found, return empty arrays but valid JSON"##;

/// Whole-document prompt, used for native PDF input and for the full-page
/// fallback when the coarse scan finds nothing.
pub const FULL_DOCUMENT_PROMPT: &str = r#"You are analyzing a construction plan document. Extract the following information:

1. **Bid Items**: List all bid items with their item numbers, descriptions, quantities, and units.
2. **Specifications**: List any specification codes or references (e.g., ASTM, AASHTO).
3. **Project Details**: Extract project name, location, bid date if visible.
4. **Materials**: List specific materials mentioned with quantities.

Return the data in this JSON format:
{
  "bid_items": [
    {
      "item_number": "101",
      "description": "Clearing and Grubbing",
      "quantity": 1.0,
      "unit": "LS",
      "unit_price": null
    }
  ],
  "specifications": [
    {
      "code": "ASTM C150",
      "description": "Portland Cement"
    }
  ],
  "project_info": {
    "name": "Highway 90 Expansion",
    "location": "Lafayette, LA",
    "bid_date": "2024-03-15"
  },
  "materials": [
    {
      "name": "Concrete",
      "quantity": 500,
      "unit": "CY",
      "specification": "ASTM C150"
    }
  ]
}

Be thorough but only include items explicitly mentioned in the document.
If information is not found, use null or empty arrays. Return ONLY the JSON."#;
